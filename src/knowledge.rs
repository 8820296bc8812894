// src/knowledge.rs
//! Static market knowledge: listed companies, sector keyword banks, the
//! regulator→sector table, and supply-chain relationships. Everything here is
//! reference data; no I/O at runtime beyond the embedded JSON parse.

use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;

/// Ticker and sector info for a known listed company.
#[derive(Debug, Clone, Deserialize)]
pub struct CompanyInfo {
    pub ticker_nse: String,
    pub ticker_bse: Option<String>,
    pub sector: String,
}

static COMPANIES: Lazy<HashMap<String, CompanyInfo>> = Lazy::new(|| {
    let raw = include_str!("companies.json");
    serde_json::from_str::<HashMap<String, CompanyInfo>>(raw).expect("valid companies table")
});

/// Lowercased name/ticker → canonical company name, for case-insensitive lookup.
static COMPANY_ALIASES: Lazy<HashMap<String, String>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for (name, info) in COMPANIES.iter() {
        m.insert(name.to_lowercase(), name.clone());
        m.insert(info.ticker_nse.to_lowercase(), name.clone());
    }
    m
});

/// Sector → member companies, derived once from the company table.
static SECTOR_MEMBERS: Lazy<HashMap<String, Vec<String>>> = Lazy::new(|| {
    let mut m: HashMap<String, Vec<String>> = HashMap::new();
    // One entry per distinct NSE ticker so alias names (SBI / State Bank of
    // India) don't double-count a sector's population.
    let mut seen: HashMap<String, std::collections::HashSet<String>> = HashMap::new();
    let mut names: Vec<&String> = COMPANIES.keys().collect();
    names.sort();
    for name in names {
        let info = &COMPANIES[name];
        let tickers = seen.entry(info.sector.clone()).or_default();
        if tickers.insert(info.ticker_nse.clone()) {
            m.entry(info.sector.clone()).or_default().push(name.clone());
        }
    }
    m
});

/// Sector classification keywords, matched against lowercased text.
pub static SECTOR_KEYWORDS: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("Banking", vec!["bank", "banking", "credit", "loan", "deposit", "npa"]),
        ("Financial Services", vec!["nbfc", "mutual fund", "insurance", "fintech"]),
        ("IT", vec!["software", "technology", "digital", "cloud", "saas"]),
        ("Pharma", vec!["pharma", "drug", "medicine", "healthcare", "hospital"]),
        ("Auto", vec!["automobile", "vehicle", "car", "ev", "electric vehicle"]),
        ("FMCG", vec!["consumer", "fmcg", "retail", "food", "beverage"]),
        ("Energy", vec!["oil", "gas", "power", "energy", "renewable", "solar"]),
        ("Metals", vec!["steel", "metal", "mining", "aluminium", "copper"]),
        ("Telecom", vec!["telecom", "5g", "spectrum", "mobile", "broadband"]),
        ("Real Estate", vec!["real estate", "property", "housing", "realty"]),
        ("Infrastructure", vec!["infrastructure", "construction", "roads", "railways"]),
    ])
});

/// Regulator aliases → canonical short name.
static REGULATOR_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("rbi", "RBI"),
        ("reserve bank of india", "RBI"),
        ("reserve bank", "RBI"),
        ("sebi", "SEBI"),
        ("securities and exchange board", "SEBI"),
        ("irdai", "IRDAI"),
        ("insurance regulatory", "IRDAI"),
        ("pfrda", "PFRDA"),
        ("pension fund regulatory", "PFRDA"),
        ("ministry of finance", "Ministry of Finance"),
        ("finance ministry", "Ministry of Finance"),
        ("nclt", "NCLT"),
        ("national company law tribunal", "NCLT"),
    ])
});

/// Supply-chain relationships: upstream input → downstream sectors it feeds.
pub static SUPPLY_CHAIN: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("Steel", vec!["Auto", "Infrastructure", "Real Estate"]),
        ("Crude Oil", vec!["Energy", "Paints", "Aviation", "Chemicals"]),
        ("Interest Rates", vec!["Banking", "Financial Services", "Real Estate", "Auto"]),
        ("Rupee", vec!["IT", "Pharma", "FMCG"]),
        ("Monsoon", vec!["FMCG", "Auto"]),
    ])
});

/// Theme keywords used for intent classification of free-form queries.
pub const THEME_KEYWORDS: [&str; 6] = [
    "interest rate",
    "inflation",
    "earnings",
    "dividend",
    "merger",
    "ipo",
];

/// Look up a company by display name or NSE ticker, case-insensitive.
pub fn company(name: &str) -> Option<(&'static str, &'static CompanyInfo)> {
    let canonical = COMPANY_ALIASES.get(&name.trim().to_lowercase())?;
    let (k, v) = COMPANIES.get_key_value(canonical)?;
    Some((k.as_str(), v))
}

/// All companies classified under `sector` (one per distinct ticker).
pub fn companies_in_sector(sector: &str) -> Vec<(&'static str, &'static CompanyInfo)> {
    SECTOR_MEMBERS
        .get(sector)
        .map(|names| {
            names
                .iter()
                .filter_map(|n| COMPANIES.get_key_value(n))
                .map(|(k, v)| (k.as_str(), v))
                .collect()
        })
        .unwrap_or_default()
}

/// Canonical regulator name for a matched alias, if known.
pub fn canonical_regulator(alias: &str) -> Option<&'static str> {
    REGULATOR_ALIASES.get(alias.trim().to_lowercase().as_str()).copied()
}

/// Sectors governed by a regulator. NCLT is case-specific, hence empty.
pub fn regulator_sectors(regulator: &str) -> &'static [&'static str] {
    match regulator {
        "RBI" => &["Banking", "Financial Services"],
        "SEBI" => &["Financial Services"],
        "IRDAI" => &["Financial Services"],
        "PFRDA" => &["Financial Services"],
        "Ministry of Finance" => &["Banking", "Financial Services"],
        _ => &[],
    }
}

/// Company names sorted longest-first, so greedy matching prefers the most
/// specific alias ("Tata Consultancy Services" over "TCS").
pub fn company_names_longest_first() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = COMPANIES.keys().map(|s| s.as_str()).collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    names
}

/// Known regulator aliases, longest-first (same greedy-match reasoning).
pub fn regulator_names_longest_first() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = REGULATOR_ALIASES.keys().copied().collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    names
}
