//! sprechfunk-server – Demo-Relay ueber UDP
//!
//! Der Basis-Server aus `sprechfunk-voice` kennt keine Sockets. Hier wird
//! er an einen tokio-UDP-Socket gehaengt. Zuverlaessig und unzuverlaessig
//! sind auf diesem Transport beides einfache Datagramme.

pub mod config;

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Result;
use config::ServerConfig;
use sprechfunk_voice::{BaseServer, ServerTransport};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Pruefabstand fuer stille Clients
const WARTUNG_INTERVALL: Duration = Duration::from_secs(1);

/// Sendet direkt auf den Socket, ohne zu warten
struct UdpTransport<'a> {
    socket: &'a UdpSocket,
}

impl UdpTransport<'_> {
    fn senden(&self, an: &SocketAddr, daten: &[u8]) {
        if let Err(e) = self.socket.try_send_to(daten, *an) {
            warn!(ziel = %an, fehler = %e, bytes = daten.len(), "Datagramm nicht gesendet");
        }
    }
}

impl ServerTransport<SocketAddr> for UdpTransport<'_> {
    fn send_reliable(&mut self, an: &SocketAddr, daten: &[u8]) {
        self.senden(an, daten);
    }

    fn send_unreliable(&mut self, an: &SocketAddr, daten: &[u8]) {
        self.senden(an, daten);
    }
}

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    basis: BaseServer<SocketAddr>,
    /// Letztes Paket je Verbindung
    zuletzt: HashMap<SocketAddr, Instant>,
}

impl Server {
    /// Erstellt einen neuen Server mit zufaelliger Session
    pub fn neu(config: ServerConfig) -> Self {
        Self {
            config,
            basis: BaseServer::neu(),
            zuletzt: HashMap::new(),
        }
    }

    pub fn session(&self) -> u32 {
        self.basis.session()
    }

    /// Bindet den Socket und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let adresse = self.config.udp_bind_adresse();
        let socket = UdpSocket::bind(&adresse).await?;
        info!(adresse = %socket.local_addr()?, session = self.session(), "Server startet");

        self.laufen(socket, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(fehler = %e, "Ctrl-C-Handler nicht verfuegbar");
                std::future::pending::<()>().await;
            }
            info!("Shutdown-Signal empfangen, Server wird beendet");
        })
        .await
    }

    /// Empfangsschleife auf einem bereits gebundenen Socket
    pub async fn laufen(mut self, socket: UdpSocket, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut puffer = vec![0u8; self.config.netzwerk.max_datagramm.max(64)];
        let mut wartung = tokio::time::interval(WARTUNG_INTERVALL);
        let mut statistik = self.config.statistik_intervall().map(tokio::time::interval);
        let timeout = self.config.client_timeout();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                empfangen = socket.recv_from(&mut puffer) => {
                    let (n, von) = match empfangen {
                        Ok(ergebnis) => ergebnis,
                        Err(e) => {
                            // Unter Windows meldet recv_from ICMP-Fehler frueherer Sends
                            debug!(fehler = %e, "Empfangsfehler");
                            continue;
                        }
                    };
                    let jetzt = Instant::now();
                    self.zuletzt.insert(von, jetzt);
                    let mut transport = UdpTransport { socket: &socket };
                    self.basis.paket_empfangen(&mut transport, &von, &puffer[..n], jetzt);
                }
                _ = wartung.tick() => {
                    self.stille_clients_trennen(&socket, Instant::now(), timeout);
                }
                _ = async { statistik.as_mut()?.tick().await; Some(()) }, if statistik.is_some() => {
                    let traffic = self.basis.traffic();
                    info!(
                        clients = self.basis.client_anzahl(),
                        empfangen = %traffic.empfangen(),
                        gesendet = %traffic.sent,
                        "Verkehr"
                    );
                }
                _ = &mut shutdown => break,
            }
        }
        Ok(())
    }

    fn stille_clients_trennen(&mut self, socket: &UdpSocket, jetzt: Instant, timeout: Duration) {
        let still: Vec<SocketAddr> = self
            .zuletzt
            .iter()
            .filter(|(_, t)| jetzt.saturating_duration_since(**t) > timeout)
            .map(|(a, _)| *a)
            .collect();

        for adresse in still {
            self.zuletzt.remove(&adresse);
            debug!(%adresse, "Client antwortet nicht mehr");
            let mut transport = UdpTransport { socket };
            self.basis.client_getrennt(&mut transport, &adresse, jetzt);
        }
    }
}
