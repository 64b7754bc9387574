//! Page journey generator.

use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Pages a loyalty-app journey moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Page {
    Home,
    LoyaltyHome,
    MyProfile,
    /// The literal `x` page the counter catalogue still points at.
    Placeholder,
    QrCode,
    CouponCardList,
    DeliveryMethod,
    ProductDetail,
}

impl Page {
    pub const ALL: [Page; 8] = [
        Page::Home,
        Page::LoyaltyHome,
        Page::MyProfile,
        Page::Placeholder,
        Page::QrCode,
        Page::CouponCardList,
        Page::DeliveryMethod,
        Page::ProductDetail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Page::Home => "Home",
            Page::LoyaltyHome => "Loyalty Home",
            Page::MyProfile => "My Profile",
            Page::Placeholder => "x",
            Page::QrCode => "QR Code",
            Page::CouponCardList => "Coupon Card List",
            Page::DeliveryMethod => "Delivery Method",
            Page::ProductDetail => "Product Detail",
        }
    }

    fn index(&self) -> usize {
        Page::ALL.iter().position(|p| p == self).unwrap_or(0)
    }

    /// Weighted next pages.
    fn transitions(&self) -> &'static [(Page, f64)] {
        match self {
            Page::Home => &[
                (Page::Placeholder, 0.30),
                (Page::LoyaltyHome, 0.20),
                (Page::ProductDetail, 0.25),
                (Page::QrCode, 0.10),
                (Page::MyProfile, 0.15),
            ],
            Page::LoyaltyHome => &[
                (Page::Placeholder, 0.40),
                (Page::CouponCardList, 0.30),
                (Page::QrCode, 0.20),
                (Page::Home, 0.10),
            ],
            Page::MyProfile => &[
                (Page::Placeholder, 0.50),
                (Page::Home, 0.30),
                (Page::LoyaltyHome, 0.20),
            ],
            Page::Placeholder => &[
                (Page::Placeholder, 0.20),
                (Page::Home, 0.40),
                (Page::CouponCardList, 0.20),
                (Page::MyProfile, 0.20),
            ],
            Page::QrCode => &[(Page::Home, 0.60), (Page::LoyaltyHome, 0.40)],
            Page::CouponCardList => &[
                (Page::Placeholder, 0.30),
                (Page::LoyaltyHome, 0.40),
                (Page::Home, 0.30),
            ],
            Page::DeliveryMethod => &[(Page::Home, 0.70), (Page::ProductDetail, 0.30)],
            Page::ProductDetail => &[
                (Page::DeliveryMethod, 0.40),
                (Page::Home, 0.40),
                (Page::ProductDetail, 0.20),
            ],
        }
    }
}

/// One source event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickEvent {
    pub timestamp: NaiveDateTime,
    pub subject_id: String,
    pub page: Page,
    pub country: String,
}

/// What to generate.
#[derive(Debug, Clone)]
pub struct JourneyConfig {
    pub seed: u64,
    pub year: i32,
    /// 1..=12
    pub month: u32,
    pub country: String,
    pub subjects: usize,
    /// Upper bound on events per subject (at least 1)
    pub max_events_per_subject: usize,
    /// Chance of leaving the app after each event
    pub exit_probability: f64,
}

impl Default for JourneyConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            year: 2022,
            month: 12,
            country: "th".to_string(),
            subjects: 1_000,
            max_events_per_subject: 20,
            exit_probability: 0.15,
        }
    }
}

/// Generates page journeys that stay inside the configured month.
pub struct JourneyGenerator {
    config: JourneyConfig,
    month_start: NaiveDateTime,
    month_end: NaiveDateTime,
    entry: WeightedIndex<f64>,
    next: Vec<WeightedIndex<f64>>,
}

const ENTRY_PAGES: [(Page, f64); 4] = [
    (Page::Home, 0.60),
    (Page::LoyaltyHome, 0.20),
    (Page::MyProfile, 0.10),
    (Page::QrCode, 0.10),
];

fn weighted(choices: &[(Page, f64)]) -> Result<WeightedIndex<f64>> {
    WeightedIndex::new(choices.iter().map(|(_, w)| *w))
        .map_err(|e| anyhow!("invalid page weights: {}", e))
}

impl JourneyGenerator {
    pub fn new(config: JourneyConfig) -> Result<Self> {
        let first = NaiveDate::from_ymd_opt(config.year, config.month, 1)
            .ok_or_else(|| anyhow!("invalid month {}-{}", config.year, config.month))?;
        let (next_year, next_month) = if config.month == 12 {
            (config.year + 1, 1)
        } else {
            (config.year, config.month + 1)
        };
        let after = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .ok_or_else(|| anyhow!("invalid month {}-{}", next_year, next_month))?;

        if !(0.0..1.0).contains(&config.exit_probability) {
            return Err(anyhow!(
                "exit probability must be in [0, 1), got {}",
                config.exit_probability
            ));
        }

        let next = Page::ALL
            .iter()
            .map(|page| weighted(page.transitions()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            month_start: first.and_hms_opt(0, 0, 0).unwrap_or_default(),
            month_end: after.and_hms_opt(0, 0, 0).unwrap_or_default(),
            entry: weighted(&ENTRY_PAGES)?,
            next,
            config,
        })
    }

    /// Generate every subject's journey, subject by subject in time order.
    pub fn generate(&self) -> Vec<ClickEvent> {
        (0..self.config.subjects)
            .flat_map(|i| self.journey(i))
            .collect()
    }

    fn journey(&self, subject_index: usize) -> Vec<ClickEvent> {
        let mut rng = ChaCha8Rng::seed_from_u64(
            self.config
                .seed
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add(subject_index as u64),
        );

        let subject_id = format!("{:016x}", rng.gen::<u64>());
        let month_seconds = (self.month_end - self.month_start).num_seconds();
        // Leave an hour of room so short journeys fit before month end
        let offset = rng.gen_range(0..(month_seconds - 3_600).max(1));
        let mut timestamp = self.month_start + Duration::seconds(offset);

        let max_events = self.config.max_events_per_subject.max(1);
        let mut page = ENTRY_PAGES[self.entry.sample(&mut rng)].0;
        let mut events = Vec::new();

        loop {
            events.push(ClickEvent {
                timestamp,
                subject_id: subject_id.clone(),
                page,
                country: self.config.country.clone(),
            });

            if events.len() >= max_events || rng.gen_bool(self.config.exit_probability) {
                break;
            }

            timestamp += Duration::seconds(rng.gen_range(5..600));
            if timestamp >= self.month_end {
                break;
            }

            let choices = page.transitions();
            page = choices[self.next[page.index()].sample(&mut rng)].0;
        }

        events
    }
}
