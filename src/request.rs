/// Normalisation des requêtes utilisateur
///
/// Quatre combinaisons de paramètres sont acceptées, tout le reste est
/// rejeté avant d'entrer dans le pipeline:
///
/// | paramètres   | type      | borne récente        | borne ancienne |
/// |--------------|-----------|----------------------|----------------|
/// | count        | CountOnly | maintenant (aligné)  | dérivée        |
/// | count + to   | ToCount   | dérivée de `to`      | dérivée        |
/// | to + end     | ToEnd     | dérivée de `to`      | align(end)     |
/// | end          | EndOnly   | maintenant (aligné)  | align(end)     |
use crate::error::{ProviderError, Result};
use crate::time_grid::TimeGrid;
use crate::timeframe::Timeframe;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Forme de la requête après validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    CountOnly,
    ToCount,
    ToEnd,
    EndOnly,
}

/// Requête utilisateur, avant normalisation
///
/// DESIGN: struct d'options avec méthodes builder, à la manière des
/// options de backfill. `to` et `end` acceptent une précision
/// sous-timeframe (millisecondes).
#[derive(Debug, Clone)]
pub struct CandleRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub count: Option<i64>,
    pub to_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

impl CandleRequest {
    pub fn new(symbol: &str, timeframe: Timeframe) -> Self {
        CandleRequest {
            symbol: symbol.to_uppercase(),
            timeframe,
            count: None,
            to_ms: None,
            end_ms: None,
        }
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_to_ms(mut self, to_ms: i64) -> Self {
        self.to_ms = Some(to_ms);
        self
    }

    pub fn with_end_ms(mut self, end_ms: i64) -> Self {
        self.end_ms = Some(end_ms);
        self
    }

    /// Définit `to` depuis une chaîne (RFC3339, "YYYY-MM-DD HH:MM:SS" ou "YYYY-MM-DD")
    pub fn with_to_date(mut self, date_str: &str) -> Result<Self> {
        self.to_ms = Some(parse_user_timestamp(date_str)?);
        Ok(self)
    }

    /// Définit `end` depuis une chaîne, mêmes formats que `with_to_date`
    pub fn with_end_date(mut self, date_str: &str) -> Result<Self> {
        self.end_ms = Some(parse_user_timestamp(date_str)?);
        Ok(self)
    }
}

/// Forme normalisée et validée d'une requête, immuable ensuite
///
/// `aligned_to` est la frontière la plus récente à servir; `aligned_end`
/// la plus ancienne (absente pour les requêtes par compte seul).
/// `target_count` est toujours dérivé à la construction.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub request_type: RequestType,
    pub aligned_to: i64,
    pub aligned_end: Option<i64>,
    pub target_count: i64,
}

impl RequestInfo {
    /// Normalise contre l'horloge murale
    pub fn normalize(request: &CandleRequest) -> Result<RequestInfo> {
        Self::normalize_at(request, TimeGrid::now_aligned(request.timeframe))
    }

    /// Normalise contre une frontière "maintenant" fournie (testable)
    ///
    /// ALGORITHME:
    /// 1. Identifie la forme parmi les quatre admises
    /// 2. Dérive `aligned_to`: pour `to`, la frontière la plus récente
    ///    STRICTEMENT antérieure: un `to` exactement aligné exclut sa
    ///    propre frontière (compensation symétrique avec le `to` exclusif
    ///    de l'exchange: les deux corrections s'annulent)
    /// 3. Rejette toute frontière future
    /// 4. Dérive le compte cible
    pub fn normalize_at(request: &CandleRequest, now_aligned: i64) -> Result<RequestInfo> {
        let tf = request.timeframe;

        if let Some(count) = request.count {
            if count < 1 {
                return Err(ProviderError::InvalidRequest(format!(
                    "count doit être >= 1, reçu {count}"
                )));
            }
        }

        let request_type = match (request.count, request.to_ms, request.end_ms) {
            (Some(_), None, None) => RequestType::CountOnly,
            (Some(_), Some(_), None) => RequestType::ToCount,
            (None, Some(_), Some(_)) => RequestType::ToEnd,
            (None, None, Some(_)) => RequestType::EndOnly,
            (None, None, None) => {
                return Err(ProviderError::InvalidRequest(
                    "aucun paramètre: fournir count, count+to, to+end ou end".into(),
                ));
            }
            (Some(_), _, Some(_)) => {
                return Err(ProviderError::InvalidRequest(
                    "count et end sont mutuellement exclusifs".into(),
                ));
            }
            (None, Some(_), None) => {
                return Err(ProviderError::InvalidRequest(
                    "to seul est insuffisant: ajouter count ou end".into(),
                ));
            }
        };

        let aligned_to = match request.to_ms {
            Some(to) => {
                let down = TimeGrid::align_down(to, tf);
                // `to` est un point du temps: une frontière exactement sur
                // `to` n'a pas encore eu lieu du point de vue de l'appelant
                if down == to {
                    TimeGrid::advance(down, tf, -1)?
                } else {
                    down
                }
            }
            None => now_aligned,
        };

        if aligned_to > now_aligned {
            return Err(ProviderError::InvalidRequest(format!(
                "frontière future demandée: {aligned_to} > {now_aligned}"
            )));
        }

        let aligned_end = match request.end_ms {
            Some(end) => {
                let aligned = TimeGrid::align_down(end, tf);
                if aligned > aligned_to {
                    return Err(ProviderError::InvalidRequest(format!(
                        "end ({aligned}) postérieur à la borne récente ({aligned_to})"
                    )));
                }
                Some(aligned)
            }
            None => None,
        };

        let target_count = match request_type {
            RequestType::CountOnly | RequestType::ToCount => {
                request.count.expect("forme validée avec count")
            }
            RequestType::ToEnd | RequestType::EndOnly => {
                let end = aligned_end.expect("forme validée avec end");
                TimeGrid::count_between(end, aligned_to, tf)?
            }
        };

        Ok(RequestInfo {
            symbol: request.symbol.clone(),
            timeframe: tf,
            request_type,
            aligned_to,
            aligned_end,
            target_count,
        })
    }
}

/// Parse un timestamp utilisateur en millisecondes epoch UTC
///
/// Formats admis: RFC3339 ("2025-09-09T00:50:00Z"), date-heure naïve UTC
/// ("2025-09-09 00:50:00") ou date seule ("2025-09-09", minuit UTC)
pub fn parse_user_timestamp(s: &str) -> Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc().timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0).expect("minuit toujours valide");
        return Ok(naive.and_utc().timestamp_millis());
    }
    Err(ProviderError::InvalidRequest(format!(
        "date illisible: '{s}'"
    )))
}
