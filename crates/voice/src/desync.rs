//! Desync-Korrektur der Wiedergabe
//!
//! Vergleicht die ideale Position (Wanduhr seit Aktivierung) mit der
//! tatsaechlich gelesenen Position und leitet daraus einen Faktor fuer
//! die Wiedergabegeschwindigkeit ab. Innerhalb einer Totzone wird nicht
//! korrigiert, darueber steigt die Korrektur linear bis zur maximalen
//! Abweichung.

use std::time::Duration;

use sprechfunk_core::VoiceConfig;

/// Geschwindigkeitskorrektur einer Wiedergabe
#[derive(Debug, Clone)]
pub struct DesyncCorrector {
    totzone_ms: f64,
    max_ms: f64,
    max_abweichung: f32,
    /// Positiv: Wiedergabe haengt hinterher
    desync_ms: i64,
}

impl DesyncCorrector {
    pub fn neu(config: &VoiceConfig) -> Self {
        Self {
            totzone_ms: config.desync_totzone_ms,
            max_ms: config.desync_max_ms,
            max_abweichung: config.max_geschwindigkeits_abweichung,
            desync_ms: 0,
        }
    }

    /// Berechnet den Desync neu
    pub fn update(&mut self, ideal: Duration, tatsaechlich: Duration) {
        let roh = (ideal.as_secs_f64() - tatsaechlich.as_secs_f64()) * 1000.0;

        let bereinigt = if roh > self.totzone_ms {
            roh - self.totzone_ms
        } else if roh < -self.totzone_ms {
            roh + self.totzone_ms
        } else {
            0.0
        };
        self.desync_ms = bereinigt as i64;
    }

    /// Verschiebt den Desync nach einem Sprung in der Wiedergabe
    pub fn skip(&mut self, delta_ms: i64) {
        self.desync_ms += delta_ms;
    }

    pub fn desync_ms(&self) -> i64 {
        self.desync_ms
    }

    /// Faktor fuer die Wiedergabegeschwindigkeit, begrenzt auf
    /// `1 +- max_abweichung`
    pub fn korrigierte_geschwindigkeit(&self) -> f32 {
        let alpha = (self.desync_ms as f64 / self.max_ms).clamp(-1.0, 1.0);
        1.0 + self.max_abweichung * alpha as f32
    }

    pub fn reset(&mut self) {
        self.desync_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn korrektor() -> DesyncCorrector {
        DesyncCorrector::neu(&VoiceConfig::default())
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn totzone_ignoriert_kleinen_versatz() {
        let mut d = korrektor();
        d.update(ms(1_020), ms(1_000));
        assert_eq!(d.desync_ms(), 0);
        d.update(ms(1_000), ms(1_029));
        assert_eq!(d.desync_ms(), 0);
        assert_eq!(d.korrigierte_geschwindigkeit(), 1.0);
    }

    #[test]
    fn versatz_ausserhalb_der_totzone_wird_verkuerzt() {
        let mut d = korrektor();
        d.update(ms(1_100), ms(1_000));
        assert_eq!(d.desync_ms(), 71);
        d.update(ms(1_000), ms(1_100));
        assert_eq!(d.desync_ms(), -71);
    }

    #[test]
    fn nachlaufende_wiedergabe_wird_schneller() {
        let mut d = korrektor();
        d.update(ms(279), ms(0));
        // (279 - 29) / 500 * 0.1
        assert!((d.korrigierte_geschwindigkeit() - 1.05).abs() < 1e-6);

        d.update(ms(0), ms(279));
        assert!((d.korrigierte_geschwindigkeit() - 0.95).abs() < 1e-6);
    }

    #[test]
    fn geschwindigkeit_bleibt_im_band() {
        let mut d = korrektor();
        for versatz in (0..=2_000u64).step_by(37) {
            d.update(ms(versatz), ms(0));
            let v = d.korrigierte_geschwindigkeit();
            assert!((0.9..=1.1).contains(&v), "versatz {versatz}: {v}");

            d.update(ms(0), ms(versatz));
            let v = d.korrigierte_geschwindigkeit();
            assert!((0.9..=1.1).contains(&v), "versatz -{versatz}: {v}");
        }
    }

    #[test]
    fn skip_gleicht_sprung_aus() {
        let mut d = korrektor();
        d.update(ms(900), ms(0));
        assert_eq!(d.desync_ms(), 871);
        d.skip(-871);
        assert_eq!(d.desync_ms(), 0);
        assert_eq!(d.korrigierte_geschwindigkeit(), 1.0);
    }
}
