/// Exchange de rejeu sur données pré-chargées
///
/// Implémente `ExchangeClient` au-dessus d'un jeu de bougies en mémoire,
/// avec la même sémantique que l'API réelle: `to` exclusif, réponse de la
/// plus récente à la plus ancienne, réponse courte quand l'historique est
/// épuisé. Un compteur d'appels permet d'observer qu'une relecture depuis
/// le cache ne déclenche aucun appel.
use crate::candle::Candle;
use crate::error::Result;
use crate::exchange::ExchangeClient;
use crate::timeframe::Timeframe;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Paramètres d'un appel `fetch` reçu, pour observation dans les tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCall {
    pub count: usize,
    pub to_exclusive_ms: Option<i64>,
}

pub struct ReplayExchange {
    /// Bougies par partition, triées de la plus ancienne à la plus récente
    data: HashMap<(String, Timeframe), Vec<Candle>>,
    calls: AtomicUsize,
    fetch_log: Mutex<Vec<FetchCall>>,
}

impl ReplayExchange {
    pub fn new() -> Self {
        ReplayExchange {
            data: HashMap::new(),
            calls: AtomicUsize::new(0),
            fetch_log: Mutex::new(Vec::new()),
        }
    }

    /// Charge les bougies d'une partition (ordre d'entrée libre)
    pub fn load(&mut self, symbol: &str, tf: Timeframe, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.utc_boundary);
        self.data.insert((symbol.to_string(), tf), candles);
    }

    /// Nombre d'appels `fetch` reçus depuis la construction
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Journal des appels reçus, dans l'ordre
    pub fn fetch_log(&self) -> Vec<FetchCall> {
        self.fetch_log.lock().expect("verrou du journal").clone()
    }
}

impl Default for ReplayExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for ReplayExchange {
    async fn fetch(
        &self,
        symbol: &str,
        tf: Timeframe,
        count: usize,
        to_exclusive_ms: Option<i64>,
    ) -> Result<Vec<Candle>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_log.lock().expect("verrou du journal").push(FetchCall {
            count,
            to_exclusive_ms,
        });

        let empty = Vec::new();
        let all = self
            .data
            .get(&(symbol.to_string(), tf))
            .unwrap_or(&empty);

        // Borne droite exclusive: index de la première bougie >= to
        let end = match to_exclusive_ms {
            Some(to) => all.partition_point(|c| c.utc_boundary < to),
            None => all.len(),
        };

        let start = end.saturating_sub(count);
        let mut rows: Vec<Candle> = all[start..end].to_vec();
        rows.reverse(); // la plus récente en premier
        Ok(rows)
    }
}
