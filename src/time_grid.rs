/// Arithmétique des frontières de temps
///
/// ARCHITECTURE:
/// Toute manipulation de timestamp du système passe par ce module: aucun
/// autre composant ne parse ni n'aligne de temps. Entrées et sorties en
/// epoch millisecondes UTC. Les timeframes à largeur fixe restent en
/// arithmétique entière; le mois calendaire passe par chrono.
use crate::error::{ProviderError, Result};
use crate::timeframe::Timeframe;
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};

pub struct TimeGrid;

impl TimeGrid {
    /// Arrondit `ts_ms` à la frontière précédente du timeframe
    ///
    /// Un timestamp déjà aligné est retourné tel quel. Pour `1w` la
    /// frontière est le lundi 00:00 UTC, pour `1M` le premier du mois.
    pub fn align_down(ts_ms: i64, tf: Timeframe) -> i64 {
        match tf {
            Timeframe::W1 => {
                let dt = Self::to_datetime(ts_ms);
                let days_back = dt.weekday().num_days_from_monday() as i64;
                let day_start = ts_ms - ts_ms.rem_euclid(86_400_000);
                day_start - days_back * 86_400_000
            }
            Timeframe::Mo1 => {
                let dt = Self::to_datetime(ts_ms);
                let first = NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1)
                    .expect("premier du mois toujours valide")
                    .and_hms_opt(0, 0, 0)
                    .expect("minuit toujours valide");
                first.and_utc().timestamp_millis()
            }
            _ => {
                let tick = tf.tick_ms().expect("timeframe à largeur fixe");
                ts_ms - ts_ms.rem_euclid(tick)
            }
        }
    }

    /// Un timestamp est-il exactement sur une frontière du timeframe ?
    pub fn is_aligned(ts_ms: i64, tf: Timeframe) -> bool {
        Self::align_down(ts_ms, tf) == ts_ms
    }

    /// Largeur canonique d'une frontière en millisecondes
    ///
    /// Échoue pour `1M`: le mois calendaire n'a pas de largeur fixe,
    /// utiliser `advance`
    pub fn tick_delta(tf: Timeframe) -> Result<i64> {
        tf.tick_ms().ok_or_else(|| {
            ProviderError::InvalidTime(format!(
                "pas de largeur fixe pour {tf}, utiliser advance"
            ))
        })
    }

    /// Avance de `n` frontières (n < 0 recule)
    ///
    /// L'entrée doit être alignée. Pour le mois calendaire l'arithmétique
    /// est calendaire (31 janv + 1M = 28/29 févr, sans objet sur des
    /// frontières alignées, toujours au premier du mois).
    pub fn advance(ts_ms: i64, tf: Timeframe, n: i64) -> Result<i64> {
        if !Self::is_aligned(ts_ms, tf) {
            return Err(ProviderError::InvalidTime(format!(
                "advance exige un timestamp aligné sur {tf}: {ts_ms}"
            )));
        }
        match tf {
            Timeframe::Mo1 => {
                let dt = Self::to_datetime(ts_ms);
                let months = Months::new(n.unsigned_abs() as u32);
                let moved = if n >= 0 {
                    dt.checked_add_months(months)
                } else {
                    dt.checked_sub_months(months)
                }
                .ok_or_else(|| {
                    ProviderError::InvalidTime(format!("débordement calendaire: {ts_ms} + {n}M"))
                })?;
                Ok(moved.timestamp_millis())
            }
            _ => {
                let tick = Self::tick_delta(tf)?;
                Ok(ts_ms + n * tick)
            }
        }
    }

    /// Nombre de frontières alignées dans `[a, b]`, bornes incluses
    ///
    /// Échoue si `a > b` ou si une borne n'est pas alignée
    pub fn count_between(a: i64, b: i64, tf: Timeframe) -> Result<i64> {
        if a > b {
            return Err(ProviderError::InvalidTime(format!(
                "plage inversée: {a} > {b}"
            )));
        }
        if !Self::is_aligned(a, tf) || !Self::is_aligned(b, tf) {
            return Err(ProviderError::InvalidTime(format!(
                "bornes non alignées sur {tf}: [{a}, {b}]"
            )));
        }
        match tf {
            Timeframe::Mo1 => {
                let da = Self::to_datetime(a);
                let db = Self::to_datetime(b);
                let months =
                    (db.year() as i64 - da.year() as i64) * 12 + (db.month() as i64 - da.month() as i64);
                Ok(months + 1)
            }
            _ => {
                let tick = Self::tick_delta(tf)?;
                Ok((b - a) / tick + 1)
            }
        }
    }

    /// Séquence paresseuse des frontières alignées de `[a, b]`, croissante
    ///
    /// Toujours non vide si `a <= b`
    pub fn enumerate(a: i64, b: i64, tf: Timeframe) -> Result<BoundaryIter> {
        // Même validation que count_between
        Self::count_between(a, b, tf)?;
        Ok(BoundaryIter {
            next: Some(a),
            end: b,
            tf,
        })
    }

    /// Frontière courante: horloge murale arrondie vers le bas
    pub fn now_aligned(tf: Timeframe) -> i64 {
        Self::align_down(Utc::now().timestamp_millis(), tf)
    }

    fn to_datetime(ts_ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ts_ms).expect("timestamp ms dans la plage chrono")
    }
}

/// Itérateur des frontières alignées d'un intervalle fermé
pub struct BoundaryIter {
    next: Option<i64>,
    end: i64,
    tf: Timeframe,
}

impl Iterator for BoundaryIter {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let current = self.next?;
        if current > self.end {
            self.next = None;
            return None;
        }
        // Bornes validées à la construction: advance ne peut pas échouer
        self.next = TimeGrid::advance(current, self.tf, 1).ok();
        Some(current)
    }
}
