// src/impact.rs
//! Stock impact aggregation.
//!
//! Pure decision logic: takes an entity extraction and maps it onto concrete
//! listed stocks through four evidence channels (direct mention, sector
//! membership, regulatory reach, supply chain), then merges per ticker
//! keeping the strongest evidence. No I/O, no state.

use std::collections::HashMap;

use crate::knowledge;
use crate::types::{EntityExtraction, ImpactAnalysis, ImpactType, StockImpact};

const DIRECT_CONFIDENCE: f32 = 1.0;
const SECTOR_BASE_CONFIDENCE: f32 = 0.7;
const REGULATORY_BASE_CONFIDENCE: f32 = 0.5;
const REGULATORY_RATE_BANKING_CONFIDENCE: f32 = 0.75;
const REGULATORY_COMPANY_EVENT_CONFIDENCE: f32 = 0.4;
const SUPPLY_CHAIN_CONFIDENCE: f32 = 0.5;

/// Events that concern one company rather than a regulator's whole remit.
const COMPANY_SPECIFIC_EVENTS: &[&str] = &["merger", "ipo", "buyback"];

#[derive(Debug, Default)]
pub struct ImpactEngine;

impl ImpactEngine {
    pub fn new() -> Self {
        Self
    }

    /// Full analysis: direct, sector, and regulatory channels merged.
    /// Supply-chain mapping is event-driven and runs via [`Self::map_supply_chain`].
    pub fn analyze(&self, extraction: &EntityExtraction) -> ImpactAnalysis {
        let direct = self.map_direct(extraction);
        let direct_keys: Vec<String> =
            direct.iter().map(|i| i.merge_key().to_string()).collect();

        let mut impacts = direct;
        impacts.extend(self.map_sector(extraction, &direct_keys));
        impacts.extend(self.map_regulatory(extraction, &direct_keys));

        let merged = merge_impacts(impacts);
        let summary = summarize(&merged);
        ImpactAnalysis {
            impacted_stocks: merged,
            primary_sectors: extraction.sectors.clone(),
            summary,
        }
    }

    /// Companies named in the article itself.
    pub fn map_direct(&self, extraction: &EntityExtraction) -> Vec<StockImpact> {
        let mut out = Vec::new();
        for entity in &extraction.companies {
            if let Some((name, info)) = knowledge::company(&entity.value) {
                out.push(StockImpact {
                    symbol: name.to_string(),
                    ticker_nse: Some(info.ticker_nse.clone()),
                    ticker_bse: info.ticker_bse.clone(),
                    confidence: DIRECT_CONFIDENCE,
                    impact_type: ImpactType::Direct,
                    reasoning: "Directly mentioned in article".to_string(),
                });
            }
        }
        out
    }

    /// Peers of the detected sectors, excluding directly mentioned stocks.
    ///
    /// Confidence scales inversely with sector breadth: news about a huge
    /// sector says less about any single member than news about a small one.
    pub fn map_sector(
        &self,
        extraction: &EntityExtraction,
        direct_keys: &[String],
    ) -> Vec<StockImpact> {
        let mut out = Vec::new();
        for sector in &extraction.sectors {
            let members = knowledge::companies_in_sector(sector);
            // Breadth is the full sector population, direct mentions included.
            let confidence = match members.len() {
                0 => continue,
                n if n > 10 => SECTOR_BASE_CONFIDENCE - 0.1,
                n if n < 5 => SECTOR_BASE_CONFIDENCE + 0.1,
                _ => SECTOR_BASE_CONFIDENCE,
            };
            for (name, info) in members {
                if direct_keys.contains(&info.ticker_nse) {
                    continue;
                }
                out.push(StockImpact {
                    symbol: name.to_string(),
                    ticker_nse: Some(info.ticker_nse.clone()),
                    ticker_bse: info.ticker_bse.clone(),
                    confidence,
                    impact_type: ImpactType::Sector,
                    reasoning: format!("Part of {sector} sector affected by this news"),
                });
            }
        }
        out
    }

    /// Stocks in the sectors each detected regulator governs.
    pub fn map_regulatory(
        &self,
        extraction: &EntityExtraction,
        direct_keys: &[String],
    ) -> Vec<StockImpact> {
        let events: Vec<&str> = extraction.events.iter().map(|e| e.value.as_str()).collect();
        let rate_event = events.contains(&"rate_change");
        let company_event = events
            .iter()
            .any(|e| COMPANY_SPECIFIC_EVENTS.contains(e));

        let mut out = Vec::new();
        for regulator in &extraction.regulators {
            let Some(canonical) = knowledge::canonical_regulator(&regulator.value) else {
                continue;
            };
            for sector in knowledge::regulator_sectors(canonical) {
                let confidence = if rate_event && *sector == "Banking" {
                    REGULATORY_RATE_BANKING_CONFIDENCE
                } else if company_event {
                    REGULATORY_COMPANY_EVENT_CONFIDENCE
                } else {
                    REGULATORY_BASE_CONFIDENCE
                };
                for (name, info) in knowledge::companies_in_sector(sector) {
                    if direct_keys.contains(&info.ticker_nse) {
                        continue;
                    }
                    out.push(StockImpact {
                        symbol: name.to_string(),
                        ticker_nse: Some(info.ticker_nse.clone()),
                        ticker_bse: info.ticker_bse.clone(),
                        confidence,
                        impact_type: ImpactType::Regulatory,
                        reasoning: format!("{canonical} action affects {sector} sector"),
                    });
                }
            }
        }
        out
    }

    /// Downstream sectors fed by an upstream input ("Steel", "Crude Oil", ...).
    pub fn map_supply_chain(&self, upstream: &str) -> Vec<StockImpact> {
        let Some(downstream) = knowledge::SUPPLY_CHAIN.get(upstream) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for sector in downstream {
            for (name, info) in knowledge::companies_in_sector(sector) {
                out.push(StockImpact {
                    symbol: name.to_string(),
                    ticker_nse: Some(info.ticker_nse.clone()),
                    ticker_bse: info.ticker_bse.clone(),
                    confidence: SUPPLY_CHAIN_CONFIDENCE,
                    impact_type: ImpactType::SupplyChain,
                    reasoning: format!("{upstream} movement flows through to {sector}"),
                });
            }
        }
        merge_impacts(out)
    }
}

/// Collapse to one impact per ticker, keeping the highest-confidence evidence,
/// then order strongest first (ties broken by symbol for determinism).
fn merge_impacts(impacts: Vec<StockImpact>) -> Vec<StockImpact> {
    let mut best: HashMap<String, StockImpact> = HashMap::new();
    for impact in impacts {
        let key = impact.merge_key().to_string();
        match best.get(&key) {
            Some(existing) if existing.confidence >= impact.confidence => {}
            _ => {
                best.insert(key, impact);
            }
        }
    }
    let mut merged: Vec<StockImpact> = best.into_values().collect();
    merged.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    merged
}

/// One clause per surviving evidence channel: the top direct symbols, up to
/// two sector names pulled back out of the sector-channel reasoning, and a
/// regulatory stock count.
fn summarize(impacts: &[StockImpact]) -> String {
    if impacts.is_empty() {
        return "No significant stock impact detected.".to_string();
    }
    let mut parts: Vec<String> = Vec::new();

    let direct: Vec<&str> = impacts
        .iter()
        .filter(|i| i.impact_type == ImpactType::Direct)
        .take(3)
        .map(|i| i.symbol.as_str())
        .collect();
    if !direct.is_empty() {
        parts.push(format!("Directly impacts: {}", direct.join(", ")));
    }

    let mut sectors: Vec<&str> = Vec::new();
    for impact in impacts {
        if impact.impact_type != ImpactType::Sector {
            continue;
        }
        let name = impact
            .reasoning
            .strip_prefix("Part of ")
            .and_then(|rest| rest.split(" sector").next());
        if let Some(name) = name {
            if !sectors.contains(&name) {
                sectors.push(name);
            }
        }
    }
    sectors.truncate(2);
    if !sectors.is_empty() {
        parts.push(format!("Sector-wide impact on: {}", sectors.join(", ")));
    }

    let regulatory = impacts
        .iter()
        .filter(|i| i.impact_type == ImpactType::Regulatory)
        .count();
    if regulatory > 0 {
        parts.push(format!("Regulatory implications for {regulatory} stocks"));
    }

    if parts.is_empty() {
        "Impact analysis complete.".to_string()
    } else {
        format!("{}.", parts.join(". "))
    }
}
