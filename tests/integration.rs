mod common;

use common::*;
use std::sync::Arc;
use upbit_candles_provider::candle::{AlignedRange, SourceTag};
use upbit_candles_provider::collection::ProgressCallback;
use upbit_candles_provider::coordinator::CancelFlag;
use upbit_candles_provider::database::DatabaseManager;
use upbit_candles_provider::error::ProviderError;
use upbit_candles_provider::overlap::OverlapStatus;
use upbit_candles_provider::provider::CandleProvider;
use upbit_candles_provider::replay::{FetchCall, ReplayExchange};
use upbit_candles_provider::repository::CandleRepository;
use upbit_candles_provider::request::CandleRequest;
use upbit_candles_provider::time_grid::TimeGrid;
use upbit_candles_provider::timeframe::Timeframe;

const SEC: i64 = 1_000;

fn provider_with(db: &str, exchange: ReplayExchange) -> (CandleProvider, Arc<ReplayExchange>) {
    let exchange = Arc::new(exchange);
    let provider = CandleProvider::new(db, exchange.clone());
    (provider, exchange)
}

/// Requête "13 bougies minute jusqu'à 00:50" utilisée par plusieurs scénarios
fn request_13_to_0050() -> CandleRequest {
    CandleRequest::new("KRW-BTC", Timeframe::M1)
        .with_count(13)
        .with_to_ms(BASE + 50 * MIN)
}

// ============================================================================
// Scénario: première requête sur une base vide
// ============================================================================
#[tokio::test]
async fn fresh_request_fetches_once_and_persists() {
    let db = temp_db("fresh");
    let mut exchange = ReplayExchange::new();
    exchange.load("KRW-BTC", Timeframe::M1, minute_series(30, 55));
    let (provider, exchange) = provider_with(&db, exchange);

    let candles = provider.get_candles(&request_13_to_0050()).await.unwrap();

    assert_eq!(candles.len(), 13);
    assert_eq!(candles[0].utc_boundary, BASE + 49 * MIN);
    assert_eq!(candles[12].utc_boundary, BASE + 37 * MIN);
    assert_dense_descending(&candles, Timeframe::M1);
    assert!(candles.iter().all(|c| c.is_real()));

    // Un seul appel, avec le `to` exclusif une frontière au-dessus de la
    // borne interne: 00:49 inclus + 1 tick = 00:50
    assert_eq!(
        exchange.fetch_log(),
        vec![FetchCall {
            count: 13,
            to_exclusive_ms: Some(BASE + 50 * MIN),
        }]
    );

    // Le stockage contient exactement ces 13 lignes, toutes réelles
    let manager = DatabaseManager::new(&db).unwrap();
    let stored = CandleRepository::get_range(
        manager.connection(),
        "KRW-BTC",
        Timeframe::M1,
        AlignedRange::new(BASE, BASE + 60 * MIN),
    )
    .unwrap();
    assert_eq!(stored.len(), 13);
    assert!(stored.iter().all(|c| c.is_real()));
}

// ============================================================================
// Scénario: relecture exacte servie intégralement depuis le cache
// ============================================================================
#[tokio::test]
async fn exact_rerequest_reads_cache_only() {
    let db = temp_db("rerequest");
    let mut exchange = ReplayExchange::new();
    exchange.load("KRW-BTC", Timeframe::M1, minute_series(30, 55));
    let (provider, exchange) = provider_with(&db, exchange);

    let first = provider.get_candles(&request_13_to_0050()).await.unwrap();
    assert_eq!(exchange.call_count(), 1);

    // Relecture: recouvrement complet, zéro appel API
    let state = provider
        .collect(&request_13_to_0050(), None, None)
        .await
        .unwrap();
    assert_eq!(exchange.call_count(), 1);
    assert_eq!(state.completed.len(), 1);
    assert_eq!(
        state.completed[0].overlap_status,
        Some(OverlapStatus::CompleteOverlap)
    );

    let second = provider.get_candles(&request_13_to_0050()).await.unwrap();
    assert_eq!(exchange.call_count(), 1);
    assert_eq!(first, second);
}

// ============================================================================
// Scénario: extension d'un préfixe déjà stocké (PartialStart)
// ============================================================================
#[tokio::test]
async fn partial_start_fetches_only_missing_suffix() {
    let db = temp_db("partial_start");
    let mut exchange = ReplayExchange::new();
    exchange.load("KRW-BTC", Timeframe::M1, minute_series(30, 55));
    let (provider, exchange) = provider_with(&db, exchange);

    // Pré-remplit [43..49]
    let seed = CandleRequest::new("KRW-BTC", Timeframe::M1)
        .with_count(7)
        .with_to_ms(BASE + 50 * MIN);
    provider.get_candles(&seed).await.unwrap();
    assert_eq!(exchange.call_count(), 1);

    let state = provider
        .collect(&request_13_to_0050(), None, None)
        .await
        .unwrap();

    assert_eq!(
        state.completed[0].overlap_status,
        Some(OverlapStatus::PartialStart)
    );
    assert_eq!(
        state.completed[0].api_required,
        Some(AlignedRange::new(BASE + 37 * MIN, BASE + 42 * MIN))
    );

    // Second appel: 6 bougies manquantes, to exclusif = 00:43
    let log = exchange.fetch_log();
    assert_eq!(log.len(), 2);
    assert_eq!(
        log[1],
        FetchCall {
            count: 6,
            to_exclusive_ms: Some(BASE + 43 * MIN),
        }
    );

    let candles = provider.get_candles(&request_13_to_0050()).await.unwrap();
    assert_eq!(candles.len(), 13);
    assert_dense_descending(&candles, Timeframe::M1);
    assert_eq!(exchange.call_count(), 2);
}

// ============================================================================
// Scénario: stockage fragmenté, un seul appel couvrant
// ============================================================================
#[tokio::test]
async fn fragmented_storage_triggers_single_covering_fetch() {
    let db = temp_db("fragment");

    // Fragments pré-existants: {49, 48, 45, 44, 40}
    {
        let mut manager = DatabaseManager::new(&db).unwrap();
        let rows: Vec<_> = [49, 48, 45, 44, 40]
            .iter()
            .map(|&m| real_minute(m, 100.0 + m as f64))
            .collect();
        CandleRepository::insert_chunk(manager.connection_mut(), "KRW-BTC", Timeframe::M1, &rows)
            .unwrap();
    }

    let mut exchange = ReplayExchange::new();
    exchange.load("KRW-BTC", Timeframe::M1, minute_series(30, 55));
    let (provider, exchange) = provider_with(&db, exchange);

    let state = provider
        .collect(&request_13_to_0050(), None, None)
        .await
        .unwrap();

    assert_eq!(
        state.completed[0].overlap_status,
        Some(OverlapStatus::PartialMiddleFragment)
    );
    // Une seule plage couvrante [37..47], en un seul appel
    assert_eq!(
        state.completed[0].api_required,
        Some(AlignedRange::new(BASE + 37 * MIN, BASE + 47 * MIN))
    );
    assert_eq!(exchange.call_count(), 1);
    assert_eq!(
        exchange.fetch_log()[0],
        FetchCall {
            count: 11,
            to_exclusive_ms: Some(BASE + 48 * MIN),
        }
    );

    // Les 8 frontières manquantes ont été insérées; 13 lignes contiguës
    let manager = DatabaseManager::new(&db).unwrap();
    assert_eq!(
        CandleRepository::count_in_range(
            manager.connection(),
            "KRW-BTC",
            Timeframe::M1,
            AlignedRange::new(BASE + 37 * MIN, BASE + 49 * MIN),
        )
        .unwrap(),
        13
    );

    let candles = provider.get_candles(&request_13_to_0050()).await.unwrap();
    assert_eq!(candles.len(), 13);
    assert_dense_descending(&candles, Timeframe::M1);
}

// ============================================================================
// Scénario: marché peu liquide en secondes, synthèse d'EmptyCopy
// ============================================================================
#[tokio::test]
async fn sparse_seconds_market_produces_empty_copies() {
    let db = temp_db("sparse");
    let t = BASE; // frontière seconde

    let mut exchange = ReplayExchange::new();
    exchange.load(
        "KRW-ABC",
        Timeframe::S1,
        vec![
            real_at(t - SEC, 10.0),
            real_at(t - 3 * SEC, 9.0),
            real_at(t - 6 * SEC, 8.0),
            real_at(t - 7 * SEC, 7.0),
        ],
    );
    let (provider, _exchange) = provider_with(&db, exchange);

    let request = CandleRequest::new("KRW-ABC", Timeframe::S1)
        .with_count(10)
        .with_to_ms(t);
    let candles = provider.get_candles(&request).await.unwrap();

    assert_eq!(candles.len(), 10);
    assert_eq!(candles[0].utc_boundary, t - SEC);
    assert_eq!(candles[9].utc_boundary, t - 10 * SEC);
    assert_dense_descending(&candles, Timeframe::S1);

    let reals: Vec<i64> = candles
        .iter()
        .filter(|c| c.is_real())
        .map(|c| c.utc_boundary)
        .collect();
    assert_eq!(reals, vec![t - SEC, t - 3 * SEC, t - 6 * SEC, t - 7 * SEC]);

    // Chaque EmptyCopy pointe la Real immédiatement plus récente
    for candle in candles.iter().filter(|c| !c.is_real()) {
        let source = candle.copy_source_utc.expect("EmptyCopy sans source");
        assert!(source > candle.utc_boundary);
        assert!(reals.contains(&source));
        assert_eq!(candle.volume_base, 0.0);
        assert_eq!(candle.volume_quote, 0.0);
    }
    assert_eq!(candles.iter().filter(|c| !c.is_real()).count(), 6);
}

// ============================================================================
// Scénario: trou à cheval sur une frontière de chunk
// ============================================================================
#[tokio::test]
async fn cross_chunk_gap_is_filled_from_previous_chunk() {
    let db = temp_db("cross_chunk");

    // Trades partout sauf aux minutes 44 et 45
    let mut series = minute_series(30, 43);
    series.extend(minute_series(46, 49));
    let mut exchange = ReplayExchange::new();
    exchange.load("KRW-BTC", Timeframe::M1, series);

    let exchange = Arc::new(exchange);
    let provider = CandleProvider::new(&db, exchange.clone()).with_chunk_max(4);

    let request = CandleRequest::new("KRW-BTC", Timeframe::M1)
        .with_count(8)
        .with_to_ms(BASE + 50 * MIN);
    let candles = provider.get_candles(&request).await.unwrap();

    assert_eq!(candles.len(), 8);
    assert_dense_descending(&candles, Timeframe::M1);
    assert_eq!(exchange.call_count(), 2);

    // 00:45 et 00:44 manquaient entre les deux chunks: comblées avec la
    // dernière ligne du chunk précédent (00:46) comme référence
    let c45 = candles.iter().find(|c| c.utc_boundary == BASE + 45 * MIN).unwrap();
    let c44 = candles.iter().find(|c| c.utc_boundary == BASE + 44 * MIN).unwrap();
    assert_eq!(c45.source_tag, SourceTag::EmptyCopy);
    assert_eq!(c45.copy_source_utc, Some(BASE + 46 * MIN));
    assert_eq!(c44.source_tag, SourceTag::EmptyCopy);
    assert_eq!(c44.copy_source_utc, Some(BASE + 46 * MIN));
}

// ============================================================================
// Compensation de frontière: `to` hors frontière sert la bougie qui le contient
// ============================================================================
#[tokio::test]
async fn off_boundary_to_serves_containing_candle() {
    let db = temp_db("off_boundary");
    let mut exchange = ReplayExchange::new();
    exchange.load("KRW-BTC", Timeframe::M1, minute_series(30, 55));
    let (provider, _exchange) = provider_with(&db, exchange);

    // to = 00:50:30 → la bougie 00:50 a commencé avant `to`, elle ouvre la séquence
    let request = CandleRequest::new("KRW-BTC", Timeframe::M1)
        .with_count(5)
        .with_to_ms(BASE + 50 * MIN + 30_000);
    let candles = provider.get_candles(&request).await.unwrap();

    assert_eq!(candles.len(), 5);
    assert_eq!(candles[0].utc_boundary, BASE + 50 * MIN);
    assert_eq!(candles[4].utc_boundary, BASE + 46 * MIN);
    assert_dense_descending(&candles, Timeframe::M1);
}

// ============================================================================
// Requêtes to+end et count-seul
// ============================================================================
#[tokio::test]
async fn to_end_request_covers_exact_range() {
    let db = temp_db("to_end");
    let mut exchange = ReplayExchange::new();
    exchange.load("KRW-BTC", Timeframe::M1, minute_series(20, 55));
    let (provider, _exchange) = provider_with(&db, exchange);

    let request = CandleRequest::new("KRW-BTC", Timeframe::M1)
        .with_to_ms(BASE + 50 * MIN)
        .with_end_ms(BASE + 40 * MIN);
    let candles = provider.get_candles(&request).await.unwrap();

    // [40..49] inclus
    assert_eq!(candles.len(), 10);
    assert_eq!(candles[0].utc_boundary, BASE + 49 * MIN);
    assert_eq!(candles[9].utc_boundary, BASE + 40 * MIN);
    assert_dense_descending(&candles, Timeframe::M1);
}

#[tokio::test]
async fn count_only_request_walks_back_from_now() {
    let db = temp_db("count_only");
    let now = TimeGrid::now_aligned(Timeframe::M1);

    let mut exchange = ReplayExchange::new();
    exchange.load(
        "KRW-BTC",
        Timeframe::M1,
        (0..=30).map(|i| real_at(now - i * MIN, 50.0)).collect(),
    );
    let (provider, _exchange) = provider_with(&db, exchange);

    let request = CandleRequest::new("KRW-BTC", Timeframe::M1).with_count(5);
    let candles = provider.get_candles(&request).await.unwrap();

    assert_eq!(candles.len(), 5);
    assert_dense_descending(&candles, Timeframe::M1);
    // La bougie la plus récente servie est la plus récente disponible
    assert!(candles[0].utc_boundary <= TimeGrid::now_aligned(Timeframe::M1));
    assert!(candles[0].utc_boundary >= now);
}

// ============================================================================
// Limite historique de l'exchange
// ============================================================================
#[tokio::test]
async fn upstream_end_stops_collection_short() {
    let db = temp_db("upstream_end");

    // L'historique ne remonte qu'à la minute 44
    let mut exchange = ReplayExchange::new();
    exchange.load("KRW-BTC", Timeframe::M1, minute_series(44, 49));

    let exchange = Arc::new(exchange);
    let provider = CandleProvider::new(&db, exchange.clone()).with_chunk_max(4);

    let request = CandleRequest::new("KRW-BTC", Timeframe::M1)
        .with_count(12)
        .with_to_ms(BASE + 50 * MIN);
    let state = provider.collect(&request, None, None).await.unwrap();

    assert!(state.reached_upstream_end);
    // Chunk 1 complet (4) + chunk 2 écourté puis densifié (4): la collecte
    // s'arrête sans planifier le troisième chunk
    assert_eq!(state.completed.len(), 2);
    assert_eq!(state.total_collected, 8);

    // Relecture: même résultat, le plancher persisté empêche de fabriquer
    // des lignes sous la limite historique
    let candles = provider.get_candles(&request).await.unwrap();
    assert_eq!(candles.len(), 8);
    assert_eq!(candles[0].utc_boundary, BASE + 49 * MIN);
    assert_eq!(candles[7].utc_boundary, BASE + 42 * MIN);
    assert_dense_descending(&candles, Timeframe::M1);

    let rerun = provider.get_candles(&request).await.unwrap();
    assert_eq!(rerun, candles);
}

// ============================================================================
// Annulation entre deux chunks
// ============================================================================
#[tokio::test]
async fn cancellation_preserves_completed_chunks() {
    let db = temp_db("cancel");
    let mut exchange = ReplayExchange::new();
    exchange.load("KRW-BTC", Timeframe::M1, minute_series(20, 55));

    let exchange = Arc::new(exchange);
    let provider = CandleProvider::new(&db, exchange.clone()).with_chunk_max(4);

    // Annule dès la fin du premier chunk, via le callback de progression
    let flag = CancelFlag::new();
    let flag_in_callback = flag.clone();
    let progress: ProgressCallback = Box::new(move |snapshot| {
        if snapshot.chunk_index == 0 {
            flag_in_callback.cancel();
        }
    });

    let request = CandleRequest::new("KRW-BTC", Timeframe::M1)
        .with_count(12)
        .with_to_ms(BASE + 50 * MIN);
    let err = provider
        .get_candles_with(&request, Some(progress), Some(flag))
        .await
        .unwrap_err();

    match err {
        ProviderError::Cancelled { state } => {
            assert_eq!(state.completed.len(), 1);
            assert_eq!(state.total_collected, 4);
            assert!(state.error.is_some());
        }
        other => panic!("attendu Cancelled, reçu {other:?}"),
    }

    // Le chunk terminé reste durable
    let manager = DatabaseManager::new(&db).unwrap();
    assert_eq!(
        CandleRepository::count_in_range(
            manager.connection(),
            "KRW-BTC",
            Timeframe::M1,
            AlignedRange::new(BASE + 46 * MIN, BASE + 49 * MIN),
        )
        .unwrap(),
        4
    );

    // Annulation avant le premier chunk: rien n'est entrepris
    let pre_cancelled = CancelFlag::new();
    pre_cancelled.cancel();
    let calls_before = exchange.call_count();
    let err = provider
        .get_candles_with(&request, None, Some(pre_cancelled))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Cancelled { .. }));
    assert_eq!(exchange.call_count(), calls_before);
}

// ============================================================================
// Requêtes concurrentes sur des partitions disjointes
// ============================================================================
#[tokio::test]
async fn concurrent_disjoint_requests_match_serial_execution() {
    let mut exchange = ReplayExchange::new();
    exchange.load("KRW-BTC", Timeframe::M1, minute_series(20, 55));
    exchange.load(
        "KRW-ETH",
        Timeframe::M1,
        (20..=55).map(|m| real_minute(m, 200.0 + m as f64)).collect(),
    );
    let exchange = Arc::new(exchange);

    let btc = request_13_to_0050();
    let eth = CandleRequest::new("KRW-ETH", Timeframe::M1)
        .with_count(13)
        .with_to_ms(BASE + 50 * MIN);

    // Exécution concurrente sur une base
    let db_concurrent = temp_db("concurrent");
    let provider = CandleProvider::new(&db_concurrent, exchange.clone());
    let results = provider.collect_many(vec![btc.clone(), eth.clone()]).await;
    let concurrent: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();

    // Exécution séquentielle sur une base vierge
    let db_serial = temp_db("serial");
    let provider = CandleProvider::new(&db_serial, exchange.clone());
    let serial_btc = provider.get_candles(&btc).await.unwrap();
    let serial_eth = provider.get_candles(&eth).await.unwrap();

    assert_eq!(concurrent[0], serial_btc);
    assert_eq!(concurrent[1], serial_eth);
    assert_dense_descending(&concurrent[0], Timeframe::M1);
    assert_dense_descending(&concurrent[1], Timeframe::M1);
}

// ============================================================================
// Rejets à l'entrée
// ============================================================================
#[tokio::test]
async fn invalid_parameter_combinations_never_reach_the_pipeline() {
    let db = temp_db("invalid");
    let (provider, exchange) = provider_with(&db, ReplayExchange::new());

    let bad = vec![
        CandleRequest::new("KRW-BTC", Timeframe::M1), // rien
        CandleRequest::new("KRW-BTC", Timeframe::M1)
            .with_count(5)
            .with_end_ms(BASE), // count + end
        CandleRequest::new("KRW-BTC", Timeframe::M1).with_to_ms(BASE), // to seul
        CandleRequest::new("KRW-BTC", Timeframe::M1).with_count(0),
    ];

    for request in bad {
        let err = provider.get_candles(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)), "{err:?}");
    }

    // Aucune de ces requêtes n'a touché l'exchange
    assert_eq!(exchange.call_count(), 0);
}
