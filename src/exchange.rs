/// Client de l'API Upbit pour les bougies historiques
///
/// ARCHITECTURE:
/// Le cœur du provider ne consomme qu'une capacité: `ExchangeClient`, un
/// trait à opération unique. L'implémentation réelle parle à l'API REST
/// publique d'Upbit (aucune authentification pour l'historique); les tests
/// branchent un client de rejeu derrière le même trait.
///
/// Contrat sur lequel le cœur s'appuie:
/// - `count` dans [1, CHUNK_MAX]
/// - `to` est EXCLUSIF: les lignes retournées ont une frontière strictement
///   antérieure; sans `to`, les plus récentes sont retournées
/// - réponse ordonnée de la plus récente à la plus ancienne
/// - réponse courte (moins que `count`) = limite historique atteinte
use crate::candle::{Candle, SourceTag};
use crate::error::{ProviderError, Result};
use crate::timeframe::Timeframe;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Nombre maximal de bougies par appel chez Upbit
pub const CHUNK_MAX: usize = 200;

const BASE_URL: &str = "https://api.upbit.com/v1";
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(110);
const MAX_FETCH_RETRIES: u32 = 3;

/// Capacité de récupération d'un chunk de bougies
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Récupère au plus `count` bougies dont la frontière est strictement
    /// antérieure à `to_exclusive_ms`, de la plus récente à la plus ancienne
    async fn fetch(
        &self,
        symbol: &str,
        tf: Timeframe,
        count: usize,
        to_exclusive_ms: Option<i64>,
    ) -> Result<Vec<Candle>>;
}

/// Bougie au format du fil Upbit
///
/// `candle_date_time_utc` est un ISO8601 naïf ("2025-09-09T00:49:00");
/// les volumes sont déjà cumulés par bougie
#[derive(Debug, Deserialize)]
struct UpbitCandle {
    #[allow(dead_code)]
    market: String,
    candle_date_time_utc: String,
    opening_price: f64,
    high_price: f64,
    low_price: f64,
    trade_price: f64,
    candle_acc_trade_price: f64,
    candle_acc_trade_volume: f64,
}

impl UpbitCandle {
    fn into_candle(self) -> Result<Candle> {
        let naive = NaiveDateTime::parse_from_str(&self.candle_date_time_utc, "%Y-%m-%dT%H:%M:%S")
            .map_err(|e| {
                ProviderError::GapFill(format!(
                    "timestamp Upbit illisible '{}': {e}",
                    self.candle_date_time_utc
                ))
            })?;

        Ok(Candle {
            utc_boundary: naive.and_utc().timestamp_millis(),
            open: self.opening_price,
            high: self.high_price,
            low: self.low_price,
            close: self.trade_price,
            volume_base: self.candle_acc_trade_volume,
            volume_quote: self.candle_acc_trade_price,
            trade_count: None, // Upbit n'expose pas le nombre de trades
            source_tag: SourceTag::Real,
            copy_source_utc: None,
        })
    }
}

/// Client REST Upbit partagé entre les collectes
///
/// Le rate limiting est interne au client: un intervalle minimal entre
/// requêtes, plus un retry borné avec backoff exponentiel sur throttling
/// et 5xx. Un 429 qui persiste après épuisement des retries remonte en
/// `RateExhausted` (fatal pour le chunk).
pub struct UpbitClient {
    client: reqwest::Client,
    base_url: String,
    last_request: Mutex<Option<Instant>>,
}

impl UpbitClient {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Base URL alternative (serveur de test)
    pub fn with_base_url(base_url: &str) -> Self {
        UpbitClient {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            last_request: Mutex::new(None),
        }
    }

    /// Espace les requêtes d'au moins MIN_REQUEST_INTERVAL
    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn fetch_once(
        &self,
        symbol: &str,
        tf: Timeframe,
        count: usize,
        to_exclusive_ms: Option<i64>,
    ) -> Result<Vec<Candle>> {
        self.rate_limit().await;

        let url = format!("{}/{}", self.base_url, tf.upbit_path());
        let mut query: Vec<(&str, String)> =
            vec![("market", symbol.to_string()), ("count", count.to_string())];
        if let Some(to_ms) = to_exclusive_ms {
            let to = DateTime::from_timestamp_millis(to_ms).ok_or_else(|| {
                ProviderError::InvalidTime(format!("timestamp hors plage: {to_ms}"))
            })?;
            query.push(("to", to.format("%Y-%m-%dT%H:%M:%SZ").to_string()));
        }

        let resp = self.client.get(&url).query(&query).send().await?;
        let status = resp.status();

        if status.as_u16() == 429 {
            return Err(ProviderError::RateExhausted(format!(
                "Upbit 429 sur {symbol}/{tf}"
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::TransientFetch(format!(
                "Upbit {status}: {body}"
            )));
        }

        let rows: Vec<UpbitCandle> = resp.json().await?;
        rows.into_iter().map(UpbitCandle::into_candle).collect()
    }
}

impl Default for UpbitClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for UpbitClient {
    async fn fetch(
        &self,
        symbol: &str,
        tf: Timeframe,
        count: usize,
        to_exclusive_ms: Option<i64>,
    ) -> Result<Vec<Candle>> {
        debug_assert!(count >= 1 && count <= CHUNK_MAX);

        let mut attempt = 0u32;
        loop {
            match self.fetch_once(symbol, tf, count, to_exclusive_ms).await {
                Ok(rows) => return Ok(rows),
                Err(e) if attempt + 1 < MAX_FETCH_RETRIES => {
                    let retryable = matches!(
                        e,
                        ProviderError::TransientFetch(_) | ProviderError::RateExhausted(_)
                    );
                    if !retryable {
                        return Err(e);
                    }
                    let pause = Duration::from_millis(500 * 2u64.pow(attempt));
                    tracing::warn!(
                        symbol,
                        timeframe = %tf,
                        attempt,
                        error = %e,
                        "échec de requête Upbit, nouvelle tentative dans {pause:?}"
                    );
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
