/// Accès aux bougies persistées et au statut des partitions
///
/// ARCHITECTURE:
/// Fournit des méthodes associées (pas de &self) opérant sur une connexion
/// empruntée, comme le reste de la couche stockage. Une partition est le
/// couple `(symbol, timeframe)`; toutes les requêtes sont bornées par des
/// frontières alignées. Les insertions sont idempotentes (INSERT OR
/// IGNORE): une ligne existante n'est jamais réécrite.
use crate::candle::{AlignedRange, Candle, SourceTag};
use crate::error::Result;
use crate::time_grid::TimeGrid;
use crate::timeframe::Timeframe;
use rusqlite::{Connection, Row, params};
use std::time::{SystemTime, UNIX_EPOCH};

const SQL_SELECT_COLUMNS: &str = "utc_boundary, open, high, low, close, volume_base, \
     volume_quote, trade_count, source_tag, copy_source_utc";

pub struct CandleRepository;

impl CandleRepository {
    /// Crée la ligne de statut de la partition au premier usage. Idempotent.
    pub fn ensure_partition(conn: &Connection, symbol: &str, tf: Timeframe) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO partition_status
             (symbol, timeframe, oldest_boundary, reached_upstream_end, last_updated)
             VALUES (?1, ?2, NULL, 0, ?3)",
            params![symbol, tf.as_str(), Self::current_timestamp_ms()],
        )?;
        Ok(())
    }

    /// Insère un chunk de bougies, en ignorant les clés déjà présentes
    ///
    /// L'insertion est atomique: tout le chunk ou rien. Les lignes peuvent
    /// arriver dans n'importe quel ordre.
    ///
    /// RETOUR: Nombre de bougies réellement insérées (pas les doublons)
    pub fn insert_chunk(
        conn: &mut Connection,
        symbol: &str,
        tf: Timeframe,
        rows: &[Candle],
    ) -> Result<i64> {
        let tx = conn.transaction()?;
        let mut inserted = 0i64;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO candles (
                    symbol, timeframe, utc_boundary, open, high, low, close,
                    volume_base, volume_quote, trade_count, source_tag, copy_source_utc
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;

            for row in rows {
                let changes = stmt.execute(params![
                    symbol,
                    tf.as_str(),
                    row.utc_boundary,
                    row.open,
                    row.high,
                    row.low,
                    row.close,
                    row.volume_base,
                    row.volume_quote,
                    row.trade_count,
                    row.source_tag.as_db(),
                    row.copy_source_utc,
                ])?;

                if changes > 0 {
                    inserted += 1;
                }
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Bougies de la plage `[oldest, newest]`, de la plus récente à la plus ancienne
    pub fn get_range(
        conn: &Connection,
        symbol: &str,
        tf: Timeframe,
        range: AlignedRange,
    ) -> Result<Vec<Candle>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SQL_SELECT_COLUMNS} FROM candles
             WHERE symbol = ?1 AND timeframe = ?2
               AND utc_boundary >= ?3 AND utc_boundary <= ?4
             ORDER BY utc_boundary DESC"
        ))?;

        let candles = stmt
            .query_map(
                params![symbol, tf.as_str(), range.oldest, range.newest],
                Self::map_candle,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(candles)
    }

    /// Une seule ligne, par sa frontière exacte
    pub fn get_row(
        conn: &Connection,
        symbol: &str,
        tf: Timeframe,
        utc_boundary: i64,
    ) -> Result<Option<Candle>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SQL_SELECT_COLUMNS} FROM candles
             WHERE symbol = ?1 AND timeframe = ?2 AND utc_boundary = ?3"
        ))?;

        let mut rows = stmt.query_map(params![symbol, tf.as_str(), utc_boundary], Self::map_candle)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Nombre de lignes dans `[oldest, newest]`
    ///
    /// Comparé au compte attendu de la plage, détecte à bas coût une
    /// couverture complète sans charger les lignes
    pub fn count_in_range(
        conn: &Connection,
        symbol: &str,
        tf: Timeframe,
        range: AlignedRange,
    ) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM candles
             WHERE symbol = ?1 AND timeframe = ?2
               AND utc_boundary >= ?3 AND utc_boundary <= ?4",
            params![symbol, tf.as_str(), range.oldest, range.newest],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Bornes extrêmes des lignes stockées dans `[oldest, newest]`
    ///
    /// RETOUR: None si la plage ne contient aucune ligne
    pub fn bounds_in_range(
        conn: &Connection,
        symbol: &str,
        tf: Timeframe,
        range: AlignedRange,
    ) -> Result<Option<AlignedRange>> {
        let bounds: (Option<i64>, Option<i64>) = conn.query_row(
            "SELECT MIN(utc_boundary), MAX(utc_boundary) FROM candles
             WHERE symbol = ?1 AND timeframe = ?2
               AND utc_boundary >= ?3 AND utc_boundary <= ?4",
            params![symbol, tf.as_str(), range.oldest, range.newest],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        match bounds {
            (Some(oldest), Some(newest)) => Ok(Some(AlignedRange::new(oldest, newest))),
            _ => Ok(None),
        }
    }

    /// Sous-plages manquantes (disjointes) de `[oldest, newest]`
    ///
    /// ALGORITHME:
    /// 1. Charge les frontières stockées de la plage, croissantes
    /// 2. Parcourt la grille attendue en parallèle (fusion de deux curseurs)
    /// 3. Toute frontière attendue absente ouvre ou étend la plage manquante courante
    ///
    /// Les frontières avant la première ligne stockée et après la dernière
    /// comptent comme manquantes: la plage cible fait foi, pas le contenu.
    pub fn find_gaps_in_range(
        conn: &Connection,
        symbol: &str,
        tf: Timeframe,
        range: AlignedRange,
    ) -> Result<Vec<AlignedRange>> {
        let mut stmt = conn.prepare(
            "SELECT utc_boundary FROM candles
             WHERE symbol = ?1 AND timeframe = ?2
               AND utc_boundary >= ?3 AND utc_boundary <= ?4
             ORDER BY utc_boundary ASC",
        )?;

        let stored: Vec<i64> = stmt
            .query_map(params![symbol, tf.as_str(), range.oldest, range.newest], |row| {
                row.get(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut gaps: Vec<AlignedRange> = Vec::new();
        let mut current_gap_start: Option<i64> = None;
        let mut last_missing: i64 = 0;
        let mut cursor = stored.iter().peekable();

        for expected in TimeGrid::enumerate(range.oldest, range.newest, tf)? {
            let present = matches!(cursor.peek(), Some(&&b) if b == expected);
            if present {
                cursor.next();
                if let Some(start) = current_gap_start.take() {
                    gaps.push(AlignedRange::new(start, last_missing));
                }
            } else {
                if current_gap_start.is_none() {
                    current_gap_start = Some(expected);
                }
                last_missing = expected;
            }
        }
        if let Some(start) = current_gap_start {
            gaps.push(AlignedRange::new(start, last_missing));
        }

        Ok(gaps)
    }

    /// Borne la plus ancienne du segment contigu qui descend depuis `start_at`
    ///
    /// RETOUR:
    /// - Some(oldest): toutes les frontières de `[oldest, start_at]` existent
    /// - None: `start_at` lui-même est absent de la partition
    pub fn first_contiguous_run(
        conn: &Connection,
        symbol: &str,
        tf: Timeframe,
        start_at: i64,
    ) -> Result<Option<i64>> {
        let mut stmt = conn.prepare(
            "SELECT utc_boundary FROM candles
             WHERE symbol = ?1 AND timeframe = ?2 AND utc_boundary <= ?3
             ORDER BY utc_boundary DESC",
        )?;

        let boundaries: Vec<i64> = stmt
            .query_map(params![symbol, tf.as_str(), start_at], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        match boundaries.first() {
            Some(&first) if first == start_at => {}
            _ => return Ok(None),
        }

        let mut oldest = start_at;
        for &b in &boundaries[1..] {
            if b == TimeGrid::advance(oldest, tf, -1)? {
                oldest = b;
            } else {
                break;
            }
        }

        Ok(Some(oldest))
    }

    /// Met à jour la progression d'une partition après un chunk persisté
    ///
    /// `oldest_boundary` est un plancher monotone ("le plus ancien atteint"):
    /// il ne remonte jamais. Le drapeau reached_upstream_end est préservé.
    pub fn update_progress(
        conn: &Connection,
        symbol: &str,
        tf: Timeframe,
        oldest_boundary: i64,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO partition_status
             (symbol, timeframe, oldest_boundary, reached_upstream_end, last_updated)
             VALUES (?1, ?2, ?3, 0, ?4)
             ON CONFLICT(symbol, timeframe) DO UPDATE SET
                 oldest_boundary = CASE
                     WHEN oldest_boundary IS NULL THEN excluded.oldest_boundary
                     ELSE MIN(oldest_boundary, excluded.oldest_boundary)
                 END,
                 last_updated = excluded.last_updated",
            params![symbol, tf.as_str(), oldest_boundary, Self::current_timestamp_ms()],
        )?;
        Ok(())
    }

    /// Marque la partition comme ayant atteint la limite historique de l'exchange
    ///
    /// Appelé quand l'API retourne moins de bougies que demandé: il n'y a
    /// plus rien de plus ancien à récupérer. Le plancher enregistré ne
    /// remonte jamais.
    pub fn mark_upstream_end(
        conn: &Connection,
        symbol: &str,
        tf: Timeframe,
        oldest_boundary: Option<i64>,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO partition_status
             (symbol, timeframe, oldest_boundary, reached_upstream_end, last_updated)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT(symbol, timeframe) DO UPDATE SET
                 oldest_boundary = CASE
                     WHEN excluded.oldest_boundary IS NULL THEN oldest_boundary
                     WHEN oldest_boundary IS NULL THEN excluded.oldest_boundary
                     ELSE MIN(oldest_boundary, excluded.oldest_boundary)
                 END,
                 reached_upstream_end = 1,
                 last_updated = excluded.last_updated",
            params![symbol, tf.as_str(), oldest_boundary, Self::current_timestamp_ms()],
        )?;
        Ok(())
    }

    /// Plancher connu de la partition (frontière la plus ancienne atteinte)
    pub fn partition_oldest(conn: &Connection, symbol: &str, tf: Timeframe) -> Option<i64> {
        conn.query_row(
            "SELECT oldest_boundary FROM partition_status
             WHERE symbol = ?1 AND timeframe = ?2",
            params![symbol, tf.as_str()],
            |row| row.get(0),
        )
        .unwrap_or(None)
    }

    /// La partition a-t-elle déjà atteint la limite historique ?
    pub fn reached_upstream_end(conn: &Connection, symbol: &str, tf: Timeframe) -> bool {
        conn.query_row(
            "SELECT reached_upstream_end FROM partition_status
             WHERE symbol = ?1 AND timeframe = ?2",
            params![symbol, tf.as_str()],
            |row| row.get(0),
        )
        .unwrap_or(0)
            == 1
    }

    fn map_candle(row: &Row<'_>) -> rusqlite::Result<Candle> {
        Ok(Candle {
            utc_boundary: row.get(0)?,
            open: row.get(1)?,
            high: row.get(2)?,
            low: row.get(3)?,
            close: row.get(4)?,
            volume_base: row.get(5)?,
            volume_quote: row.get(6)?,
            trade_count: row.get(7)?,
            source_tag: SourceTag::from_db(row.get(8)?),
            copy_source_utc: row.get(9)?,
        })
    }

    fn current_timestamp_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}
