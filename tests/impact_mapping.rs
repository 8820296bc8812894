// tests/impact_mapping.rs
//
// Impact engine over real extractions from the keyword extractor, so the
// tables and the aggregation logic are exercised together.

use finnews_intel::impact::ImpactEngine;
use finnews_intel::services::{EntityExtractor, KeywordExtractor};
use finnews_intel::types::ImpactType;

async fn analyze(text: &str) -> finnews_intel::types::ImpactAnalysis {
    let extraction = KeywordExtractor::new().extract(text).await.expect("extract");
    ImpactEngine::new().analyze(&extraction)
}

#[tokio::test]
async fn rate_hike_spreads_from_rbi_to_banks() {
    let analysis = analyze(
        "RBI raises repo rate by 25 basis points. HDFC Bank expects margin \
         pressure across the banking sector.",
    )
    .await;

    let hdfc = analysis
        .impacted_stocks
        .iter()
        .find(|i| i.symbol == "HDFC Bank")
        .expect("HDFC Bank impacted");
    assert_eq!(hdfc.impact_type, ImpactType::Direct);
    assert_eq!(hdfc.confidence, 1.0);

    // Peers come via sector membership, the regulator channel reinforces.
    let icici = analysis
        .impacted_stocks
        .iter()
        .find(|i| i.symbol == "ICICI Bank")
        .expect("ICICI Bank impacted");
    assert!(icici.confidence < 1.0);
    assert!(icici.confidence >= 0.7);

    assert!(analysis.primary_sectors.contains(&"Banking".to_string()));
    assert!(analysis.summary.contains("HDFC Bank"));
}

#[tokio::test]
async fn one_row_per_ticker_after_merge() {
    let analysis = analyze(
        "SBI and State Bank of India both quoted; banking credit growth strong.",
    )
    .await;

    let sbi_rows = analysis
        .impacted_stocks
        .iter()
        .filter(|i| i.ticker_nse.as_deref() == Some("SBIN"))
        .count();
    assert_eq!(sbi_rows, 1, "alias mentions must not duplicate a ticker");
}

#[tokio::test]
async fn non_financial_story_has_no_impact() {
    let analysis = analyze("The city marathon drew record crowds on Sunday.").await;
    assert!(analysis.impacted_stocks.is_empty());
    assert_eq!(analysis.summary, "No significant stock impact detected.");
}

#[tokio::test]
async fn supply_chain_reaches_downstream_sectors() {
    let engine = ImpactEngine::new();
    let impacts = engine.map_supply_chain("Crude Oil");
    assert!(!impacts.is_empty());
    assert!(impacts.iter().all(|i| i.impact_type == ImpactType::SupplyChain));
    // Energy is directly downstream of crude.
    assert!(impacts
        .iter()
        .any(|i| i.symbol == "Reliance Industries" || i.symbol == "NTPC"));
}

#[tokio::test]
async fn sebi_ipo_action_stays_low_confidence() {
    let analysis = analyze("SEBI tightens ipo disclosure norms for new listings.").await;
    let regulatory: Vec<_> = analysis
        .impacted_stocks
        .iter()
        .filter(|i| i.impact_type == ImpactType::Regulatory)
        .collect();
    assert!(!regulatory.is_empty());
    assert!(regulatory.iter().all(|i| i.confidence <= 0.4));
}
