//! Amplitudenmessung ueber den gleichgerichteten Mittelwert (ARV)

/// Exponentiell geglaetteter Average Rectified Value
#[derive(Debug, Clone)]
pub struct ArvMeter {
    arv: f32,
    glaettung: f32,
}

impl Default for ArvMeter {
    fn default() -> Self {
        Self::neu(0.7)
    }
}

impl ArvMeter {
    /// `glaettung` = Anteil des alten Werts pro Frame (0.0 = keine Glaettung)
    pub fn neu(glaettung: f32) -> Self {
        Self {
            arv: 0.0,
            glaettung: glaettung.clamp(0.0, 0.999),
        }
    }

    /// Misst einen Frame und gibt den neuen Wert zurueck
    pub fn update(&mut self, samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return self.arv;
        }
        self.arv = self.glaettung * self.arv + (1.0 - self.glaettung) * arv_von(samples);
        self.arv
    }

    pub fn arv(&self) -> f32 {
        self.arv
    }

    pub fn reset(&mut self) {
        self.arv = 0.0;
    }
}

/// ARV eines einzelnen Puffers ohne Glaettung
pub fn arv_von(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ungeglaettet_ist_mittelwert() {
        let mut m = ArvMeter::neu(0.0);
        assert!((m.update(&[0.5, -0.5, 0.25, -0.25]) - 0.375).abs() < 1e-6);
    }

    #[test]
    fn glaettung_naehert_sich_an() {
        let mut m = ArvMeter::default();
        let erster = m.update(&[1.0; 16]);
        assert!(erster < 1.0);
        for _ in 0..50 {
            m.update(&[1.0; 16]);
        }
        assert!(m.arv() > 0.99);
        m.reset();
        assert_eq!(m.arv(), 0.0);
    }

    #[test]
    fn arv_von_leerem_puffer() {
        assert_eq!(arv_von(&[]), 0.0);
        assert!((arv_von(&[-1.0, 1.0]) - 1.0).abs() < 1e-6);
    }
}
