//! A configured list of tracked companies and the market views built over it:
//! live quotes, top performers and sector performance.

use quant_core::Quote;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::BatchQuotes;

/// Display name and sector of a tracked company.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompanyProfile {
    pub name: String,
    pub sector: String,
}

/// Tracked companies keyed by uppercase symbol.
///
/// Defaults to fifteen NSE large caps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "BTreeMap<String, CompanyProfile>", into = "BTreeMap<String, CompanyProfile>")]
pub struct Universe(BTreeMap<String, CompanyProfile>);

impl From<BTreeMap<String, CompanyProfile>> for Universe {
    fn from(companies: BTreeMap<String, CompanyProfile>) -> Self {
        Self(
            companies
                .into_iter()
                .map(|(symbol, profile)| (symbol.trim().to_uppercase(), profile))
                .filter(|(symbol, _)| !symbol.is_empty())
                .collect(),
        )
    }
}

impl From<Universe> for BTreeMap<String, CompanyProfile> {
    fn from(universe: Universe) -> Self {
        universe.0
    }
}

impl Default for Universe {
    fn default() -> Self {
        const NSE_LARGE_CAPS: [(&str, &str, &str); 15] = [
            ("RELIANCE.NS", "Reliance Industries Ltd", "Oil & Gas"),
            ("TCS.NS", "Tata Consultancy Services", "IT Services"),
            ("HDFCBANK.NS", "HDFC Bank Ltd", "Banking"),
            ("INFY.NS", "Infosys Ltd", "IT Services"),
            ("HINDUNILVR.NS", "Hindustan Unilever Ltd", "FMCG"),
            ("ICICIBANK.NS", "ICICI Bank Ltd", "Banking"),
            ("KOTAKBANK.NS", "Kotak Mahindra Bank", "Banking"),
            ("ITC.NS", "ITC Ltd", "FMCG"),
            ("LT.NS", "Larsen & Toubro Ltd", "Construction"),
            ("SBIN.NS", "State Bank of India", "Banking"),
            ("BHARTIARTL.NS", "Bharti Airtel Ltd", "Telecom"),
            ("ASIANPAINT.NS", "Asian Paints Ltd", "Paints"),
            ("MARUTI.NS", "Maruti Suzuki India Ltd", "Automobile"),
            ("BAJFINANCE.NS", "Bajaj Finance Ltd", "NBFC"),
            ("WIPRO.NS", "Wipro Ltd", "IT Services"),
        ];
        Self::new(NSE_LARGE_CAPS)
    }
}

impl Universe {
    pub fn new<'a>(companies: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>) -> Self {
        companies
            .into_iter()
            .map(|(symbol, name, sector)| {
                (
                    symbol.to_string(),
                    CompanyProfile {
                        name: name.to_string(),
                        sector: sector.to_string(),
                    },
                )
            })
            .collect::<BTreeMap<_, _>>()
            .into()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn get(&self, symbol: &str) -> Option<&CompanyProfile> {
        self.0.get(&symbol.trim().to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Join fetched quotes with the company profiles.
    pub fn snapshot(&self, batch: BatchQuotes) -> MarketSnapshot {
        let stocks = batch
            .quotes
            .into_iter()
            .filter_map(|(symbol, quote)| {
                let profile = self.get(&symbol)?.clone();
                Some((symbol, TrackedStock { profile, quote }))
            })
            .collect();
        MarketSnapshot {
            stocks,
            errors: batch.errors,
        }
    }
}

/// A tracked company with its latest quote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedStock {
    #[serde(flatten)]
    pub profile: CompanyProfile,
    pub quote: Quote,
}

/// Quotes for the whole universe; symbols whose quote failed are listed in
/// `errors` and nowhere else.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub stocks: BTreeMap<String, TrackedStock>,
    pub errors: BTreeMap<String, String>,
}

/// Aggregate daily move of one sector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectorPerformance {
    pub symbols: Vec<String>,
    /// Mean `change_percent` of the sector's quoted stocks
    pub avg_change: f64,
    /// Sum of the market caps the provider reported
    pub total_market_cap: f64,
}

impl MarketSnapshot {
    /// Stocks ordered by `change_percent`, best first.
    pub fn top_performers(&self, limit: usize) -> Vec<TrackedStock> {
        let mut stocks: Vec<TrackedStock> = self.stocks.values().cloned().collect();
        stocks.sort_by(|a, b| b.quote.change_percent.total_cmp(&a.quote.change_percent));
        stocks.truncate(limit);
        stocks
    }

    pub fn sector_performance(&self) -> BTreeMap<String, SectorPerformance> {
        let mut sectors: BTreeMap<String, SectorPerformance> = BTreeMap::new();
        for (symbol, stock) in &self.stocks {
            let sector = sectors
                .entry(stock.profile.sector.clone())
                .or_insert_with(|| SectorPerformance {
                    symbols: Vec::new(),
                    avg_change: 0.0,
                    total_market_cap: 0.0,
                });
            sector.symbols.push(symbol.clone());
            sector.avg_change += stock.quote.change_percent;
            sector.total_market_cap += stock.quote.market_cap.unwrap_or(0.0);
        }
        for sector in sectors.values_mut() {
            sector.avg_change /= sector.symbols.len() as f64;
        }
        sectors
    }
}
