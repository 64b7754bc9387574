//! Counter catalogue for the page funnel table.
//!
//! Each counter counts the events of one subject and month whose current page
//! (and, for the `_from_` variants, previous page) equals a literal.
//!
//! Several counters still point at the placeholder page `x` and therefore
//! compute identical values. They are kept as-is until the business rules
//! behind them are defined; [`placeholder_groups`] lists them.

/// Page name the unfinished counters match on.
pub const PLACEHOLDER_PAGE: &str = "x";

/// One named counter column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSpec {
    pub name: &'static str,
    pub previous_page: Option<&'static str>,
    pub current_page: &'static str,
}

const fn on_page(name: &'static str, current_page: &'static str) -> CounterSpec {
    CounterSpec {
        name,
        previous_page: None,
        current_page,
    }
}

const fn from_page(
    name: &'static str,
    previous_page: &'static str,
    current_page: &'static str,
) -> CounterSpec {
    CounterSpec {
        name,
        previous_page: Some(previous_page),
        current_page,
    }
}

/// Counter columns in target table order.
pub const COUNTERS: [CounterSpec; 21] = [
    on_page("clicks_myCoupon", PLACEHOLDER_PAGE),
    from_page("clicks_myCoupon_from_home", "Home", PLACEHOLDER_PAGE),
    from_page("clicks_myCoupon_from_myLotus", "Loyalty Home", PLACEHOLDER_PAGE),
    from_page("clicks_myCoupon_from_myProfile", "My Profile", PLACEHOLDER_PAGE),
    on_page("clicks_redeemCoin", PLACEHOLDER_PAGE),
    from_page("clicks_redeemCoin_from_home", "Home", PLACEHOLDER_PAGE),
    from_page("clicks_redeemCoin_from_myLotus", "Loyalty Home", PLACEHOLDER_PAGE),
    from_page("clicks_redeemCoin_from_myProfile", "My Profile", PLACEHOLDER_PAGE),
    on_page("clicks_scanToEarnCoin", "QR Code"),
    on_page("clicks_Coupon_card_list", "Coupon Card List"),
    on_page("clicks_howToUseAPP", PLACEHOLDER_PAGE),
    on_page("clicks_CoinHistory", PLACEHOLDER_PAGE),
    on_page("clicks_coinPowerUpRedemption", PLACEHOLDER_PAGE),
    on_page("clicks_fastDelivery", PLACEHOLDER_PAGE),
    on_page("clicks_nextDayDelivery", "Delivery Method"),
    on_page("clicks_homeBanner1", PLACEHOLDER_PAGE),
    on_page("clicks_homeBanner2", PLACEHOLDER_PAGE),
    on_page("clicks_homeBanner3", PLACEHOLDER_PAGE),
    on_page("clicks_homeBanner4", PLACEHOLDER_PAGE),
    on_page("clicks_homeBanner5", PLACEHOLDER_PAGE),
    on_page("clicks_homeBanner6", PLACEHOLDER_PAGE),
];

impl CounterSpec {
    /// Whether an event with these pages is counted.
    ///
    /// A missing previous page (first event of a subject) never matches a
    /// `_from_` counter.
    pub fn matches(&self, previous_page: Option<&str>, current_page: &str) -> bool {
        if current_page != self.current_page {
            return false;
        }
        match self.previous_page {
            Some(expected) => previous_page == Some(expected),
            None => true,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.current_page == PLACEHOLDER_PAGE
    }

    fn predicate(&self) -> (Option<&'static str>, &'static str) {
        (self.previous_page, self.current_page)
    }
}

/// Position of a counter in [`COUNTERS`].
pub fn counter_index(name: &str) -> Option<usize> {
    COUNTERS.iter().position(|c| c.name == name)
}

/// Groups of counters that share an identical predicate.
pub fn placeholder_groups() -> Vec<Vec<&'static str>> {
    let mut groups: Vec<((Option<&str>, &str), Vec<&'static str>)> = Vec::new();

    for counter in &COUNTERS {
        match groups.iter_mut().find(|(p, _)| *p == counter.predicate()) {
            Some((_, names)) => names.push(counter.name),
            None => groups.push((counter.predicate(), vec![counter.name])),
        }
    }

    groups
        .into_iter()
        .map(|(_, names)| names)
        .filter(|names| names.len() > 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_counter_names_are_unique() {
        let names: HashSet<_> = COUNTERS.iter().map(|c| c.name).collect();
        assert_eq!(names.len(), COUNTERS.len());
    }

    #[test]
    fn test_from_counters_need_previous_page() {
        let counter = COUNTERS[counter_index("clicks_myCoupon_from_home").unwrap()];

        assert!(counter.matches(Some("Home"), "x"));
        assert!(!counter.matches(None, "x"));
        assert!(!counter.matches(Some("Loyalty Home"), "x"));
        assert!(!counter.matches(Some("Home"), "QR Code"));
    }

    #[test]
    fn test_current_page_counters_ignore_previous_page() {
        let counter = COUNTERS[counter_index("clicks_scanToEarnCoin").unwrap()];

        assert!(counter.matches(None, "QR Code"));
        assert!(counter.matches(Some("Home"), "QR Code"));
        assert!(!counter.matches(None, "qr code"));
    }

    #[test]
    fn test_placeholder_groups() {
        let groups = placeholder_groups();

        // x alone, Home->x, Loyalty Home->x, My Profile->x
        assert_eq!(groups.len(), 4);
        assert_eq!(groups[0].len(), 12);
        assert!(groups[0].contains(&"clicks_myCoupon"));
        assert!(groups[0].contains(&"clicks_homeBanner6"));
        assert_eq!(
            groups[1],
            vec!["clicks_myCoupon_from_home", "clicks_redeemCoin_from_home"]
        );

        let distinct: Vec<_> = COUNTERS.iter().filter(|c| !c.is_placeholder()).collect();
        assert_eq!(distinct.len(), 3);
    }
}
