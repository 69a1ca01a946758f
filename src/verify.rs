// ============================================================================
// MODULE DE VÉRIFICATION DE L'INTÉGRITÉ DES DONNÉES
// ============================================================================
//
// Ce module vérifie qu'une partition stockée est continue et correctement
// espacée. Il détecte:
// - Les GAPS (trous): frontières manquantes entre deux lignes
// - Les OVERLAPS (chevauchements): intervalles trop petits ou négatifs
// - Les EmptyCopy dont la référence ne pointe pas une ligne Real
// - Les statistiques globales: total, part de synthétique, plage couverte

use crate::timeframe::Timeframe;
use crate::utils::{format_timestamp_kst, format_timestamp_ms};
use anyhow::Result;
use rusqlite::{Connection, params};

/// Synthèse d'une vérification de partition
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub total_count: i64,
    pub empty_copy_count: i64,
    pub gap_count: usize,
    pub overlap_count: usize,
    /// EmptyCopy dont copy_source_utc est NULL ou pointe une ligne absente
    /// ou non-Real
    pub dangling_source_count: i64,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.gap_count == 0 && self.overlap_count == 0 && self.dangling_source_count == 0
    }
}

/// Vérifie l'espacement et le marquage d'une partition
///
/// ALGORITHME DE VÉRIFICATION:
/// 1. Détermine l'intervalle attendu selon le timeframe
/// 2. Parcourt toutes les frontières séquentiellement
/// 3. Compare chaque intervalle avec l'intervalle attendu
/// 4. Classe les anomalies: gaps (trop grand) ou overlaps (trop petit)
/// 5. Contrôle que chaque EmptyCopy référence une ligne Real existante
/// 6. Affiche un rapport détaillé des anomalies trouvées
pub fn verify_partition(conn: &Connection, symbol: &str, tf: Timeframe) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();

    println!("\n=== Vérification de l'espacement pour {symbol}/{tf} ===");

    let expected_interval_ms = match tf.tick_ms() {
        Some(tick) => tick,
        None => {
            // Mois calendaire: l'espacement varie, seul le marquage est contrôlé
            println!("Timeframe calendaire: contrôle d'espacement ignoré");
            verify_copy_sources(conn, symbol, tf, &mut report)?;
            return Ok(report);
        }
    };

    println!(
        "Intervalle attendu: {} ms ({} s)",
        expected_interval_ms,
        expected_interval_ms / 1_000
    );

    let mut stmt = conn.prepare(
        "SELECT utc_boundary FROM candles
         WHERE symbol = ?1 AND timeframe = ?2
         ORDER BY utc_boundary ASC",
    )?;

    let mut rows = stmt.query(params![symbol, tf.as_str()])?;

    let mut previous_time: Option<i64> = None;
    let mut gaps: Vec<(i64, i64)> = Vec::new(); // (timestamp, intervalle)
    let mut overlaps: Vec<(i64, i64)> = Vec::new();
    let mut first_timestamp: Option<i64> = None;
    let mut last_timestamp: Option<i64> = None;

    while let Some(row) = rows.next()? {
        let current_time: i64 = row.get(0)?;

        if first_timestamp.is_none() {
            first_timestamp = Some(current_time);
        }
        last_timestamp = Some(current_time);

        if let Some(prev) = previous_time {
            let interval = current_time - prev;
            if interval > expected_interval_ms {
                gaps.push((prev, interval));
            } else if interval < expected_interval_ms {
                overlaps.push((prev, interval));
            }
        }

        previous_time = Some(current_time);
        report.total_count += 1;
    }

    report.gap_count = gaps.len();
    report.overlap_count = overlaps.len();

    report.empty_copy_count = conn.query_row(
        "SELECT COUNT(*) FROM candles
         WHERE symbol = ?1 AND timeframe = ?2 AND source_tag = 1",
        params![symbol, tf.as_str()],
        |row| row.get(0),
    )?;

    println!("\n--- Statistiques ---");
    println!("Nombre total de bougies: {}", report.total_count);
    println!(
        "Bougies synthétiques (EmptyCopy): {} ({:.1}%)",
        report.empty_copy_count,
        if report.total_count > 0 {
            report.empty_copy_count as f64 / report.total_count as f64 * 100.0
        } else {
            0.0
        }
    );

    if let (Some(first), Some(last)) = (first_timestamp, last_timestamp) {
        println!(
            "Première bougie: {} UTC ({} KST)",
            format_timestamp_ms(first),
            format_timestamp_kst(first)
        );
        println!(
            "Dernière bougie: {} UTC ({} KST)",
            format_timestamp_ms(last),
            format_timestamp_kst(last)
        );

        let duration_ms = last - first;
        let expected_count = (duration_ms / expected_interval_ms) + 1;
        println!("Nombre de bougies attendu: {expected_count}");
        println!("Différence: {}", report.total_count - expected_count);
    }

    if !gaps.is_empty() {
        println!("\n--- GAPS DÉTECTÉS ({} gaps) ---", gaps.len());
        for (i, (timestamp, interval)) in gaps.iter().enumerate() {
            if i >= 10 {
                println!("  ... et {} autres gaps", gaps.len() - 10);
                break;
            }
            let missing_candles = (interval / expected_interval_ms) - 1;
            println!(
                "  Gap à {}: intervalle de {} ms ({} bougies manquantes)",
                format_timestamp_ms(*timestamp),
                interval,
                missing_candles
            );
        }
    } else {
        println!("\n✓ Aucun gap détecté - les données sont continues!");
    }

    if !overlaps.is_empty() {
        println!("\n--- OVERLAPS DÉTECTÉS ({} overlaps) ---", overlaps.len());
        for (i, (timestamp, interval)) in overlaps.iter().enumerate() {
            if i >= 10 {
                println!("  ... et {} autres overlaps", overlaps.len() - 10);
                break;
            }
            println!(
                "  Overlap à {}: intervalle de {} ms (attendu {} ms)",
                format_timestamp_ms(*timestamp),
                interval,
                expected_interval_ms
            );
        }
    } else {
        println!("✓ Aucun overlap détecté - les espacements sont corrects!");
    }

    verify_copy_sources(conn, symbol, tf, &mut report)?;

    println!("\n{:=<60}\n", "");

    Ok(report)
}

/// Contrôle les références des lignes synthétiques
///
/// Chaque EmptyCopy doit pointer, via copy_source_utc, une ligne Real
/// présente et STRICTEMENT plus récente qu'elle dans la partition
fn verify_copy_sources(
    conn: &Connection,
    symbol: &str,
    tf: Timeframe,
    report: &mut VerifyReport,
) -> Result<()> {
    report.dangling_source_count = conn.query_row(
        "SELECT COUNT(*) FROM candles c
         WHERE c.symbol = ?1 AND c.timeframe = ?2 AND c.source_tag = 1
           AND (c.copy_source_utc IS NULL
                OR c.copy_source_utc <= c.utc_boundary
                OR NOT EXISTS (
                    SELECT 1 FROM candles s
                    WHERE s.symbol = c.symbol AND s.timeframe = c.timeframe
                      AND s.utc_boundary = c.copy_source_utc AND s.source_tag = 0
                ))",
        params![symbol, tf.as_str()],
        |row| row.get(0),
    )?;

    if report.dangling_source_count > 0 {
        println!(
            "⚠️  {} EmptyCopy avec référence invalide",
            report.dangling_source_count
        );
    } else {
        println!("✓ Toutes les références EmptyCopy pointent une Real plus récente");
    }

    Ok(())
}
