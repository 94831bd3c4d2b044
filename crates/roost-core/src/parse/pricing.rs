//! Pricing block of an appointment page.
//!
//! `data-rate` and `data-qty` are encoded ×100; `data-amount` is already in
//! display units. A block that exists but cannot be read is an error rather
//! than `None`, since a silent miss would persist zero pricing.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};

use super::html::{document, element_text, text_by_class, with_class, with_id};
use crate::error::{Error, Result};
use crate::models::{LineItem, PetRate, Pricing};

static TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Total\s*\$([\d,]+(?:\.\d+)?)").expect("Invalid regex"));
static DAY_SERVICE_RES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)\(days?\)").expect("Invalid regex"),
        Regex::new(r"(?i)^\s*(dc|d/c)\b").expect("Invalid regex"),
        Regex::new(r"(?i)\bday\s*care\b|\bdaycare\b").expect("Invalid regex"),
    ]
});

/// Whether a service name describes a daytime service
pub fn is_day_service(name: &str) -> bool {
    DAY_SERVICE_RES.iter().any(|re| re.is_match(name))
}

/// Night rate from the first non-day item, day rate from the first day item
pub fn classify_rates(items: &[LineItem]) -> PetRate {
    PetRate {
        night_rate: items
            .iter()
            .find(|item| !is_day_service(&item.service_name))
            .map(|item| item.rate),
        day_rate: items
            .iter()
            .find(|item| is_day_service(&item.service_name))
            .map(|item| item.rate),
    }
}

#[derive(Debug, Clone, Copy)]
struct PriceEntry {
    rate: f64,
    qty: f64,
    amount: f64,
}

fn numeric_attr(entry: &ElementRef<'_>, attr: &str, service: &str) -> Result<f64> {
    let raw = entry.value().attr(attr).ok_or_else(|| {
        Error::Parse(format!("pricing entry for {service} is missing {attr}"))
    })?;
    raw.trim()
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| Error::Parse(format!("pricing entry for {service} has invalid {attr}: {raw}")))
}

fn parse_entry(entry: &ElementRef<'_>, service: &str) -> Result<PriceEntry> {
    Ok(PriceEntry {
        rate: numeric_attr(entry, "data-rate", service)? / 100.0,
        qty: numeric_attr(entry, "data-qty", service)? / 100.0,
        amount: numeric_attr(entry, "data-amount", service)?,
    })
}

/// Parse `fieldset#confirm-price`; `Ok(None)` when the page has no pricing
pub fn parse_pricing(html: &str) -> Result<Option<Pricing>> {
    pricing_in(&document(html))
}

/// [`parse_pricing`] over an already parsed page
pub fn pricing_in(page: &Html) -> Result<Option<Pricing>> {
    let Some(fieldset) = with_id(page.root_element(), "confirm-price") else {
        return Ok(None);
    };

    let total = element_text(fieldset)
        .and_then(|text| {
            let captures = TOTAL_RE.captures(&text)?;
            captures[1].replace(',', "").parse::<f64>().ok()
        })
        .ok_or_else(|| Error::Parse("pricing total is missing or unreadable".to_string()))?;

    // (service name, entries in pet order), merged by name in first-seen order
    let mut services: Vec<(String, Vec<PriceEntry>)> = Vec::new();
    for wrapper in with_class(fieldset, "service-wrapper") {
        let name = text_by_class(wrapper, "service-name")
            .ok_or_else(|| Error::Parse("pricing service is missing its name".to_string()))?;

        let entries = with_class(wrapper, "price")
            .map(|entry| parse_entry(&entry, &name))
            .collect::<Result<Vec<_>>>()?;
        if entries.is_empty() {
            return Err(Error::Parse(format!(
                "pricing service {name} has no price entries"
            )));
        }

        match services.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing)) => existing.extend(entries),
            None => services.push((name, entries)),
        }
    }

    if services.is_empty() {
        return Err(Error::Parse("pricing block has no services".to_string()));
    }

    let line_items: Vec<LineItem> = services
        .iter()
        .map(|(name, entries)| LineItem {
            service_name: name.clone(),
            rate: entries[0].rate,
            qty: entries[0].qty,
            amount: entries.iter().map(|entry| entry.amount).sum(),
        })
        .collect();

    let pet_count = services
        .iter()
        .map(|(_, entries)| entries.len())
        .max()
        .unwrap_or(1);
    let per_pet_rates = (pet_count > 1).then(|| per_pet_rates(&services, pet_count));

    Ok(Some(Pricing {
        total,
        line_items,
        per_pet_rates,
    }))
}

fn per_pet_rates(services: &[(String, Vec<PriceEntry>)], pet_count: usize) -> Vec<PetRate> {
    let night = services.iter().find(|(name, _)| !is_day_service(name));
    let day = services.iter().find(|(name, _)| is_day_service(name));
    let rate_for = |service: Option<&(String, Vec<PriceEntry>)>, pet: usize| {
        service.and_then(|(_, entries)| entries.get(pet).map(|entry| entry.rate))
    };

    (0..pet_count)
        .map(|pet| PetRate {
            night_rate: rate_for(night, pet),
            day_rate: rate_for(day, pet),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SINGLE_LINE: &str = r#"
        <fieldset id="confirm-price" class="no-legend">
          <a class="btn toggle-field text quote">Total $550 <i class="fa fa-fw"></i></a>
          <div class="toggle-field-content hidden">
            <div class="service-wrapper" data-service="22215-0">
              <span class="service-name">Boarding</span>
              <div class="price p-0 has-outstanding" data-amount="550.00" data-rate="5500" data-qty="1000">
                <span class="qty-rate">$55 x 10</span>
              </div>
            </div>
          </div>
        </fieldset>"#;

    const MULTI_PET: &str = r#"
        <fieldset id="confirm-price" class="no-legend">
          <a class="btn toggle-field text quote">Total $885 <i class="fa fa-fw"></i></a>
          <div class="pricing-appt-wrapper pets-2 services-2">
            <div class="service-wrapper">
              <span class="service-name">Boarding discounted nights for DC full-time</span>
              <div class="price p-0 has-outstanding" data-rate="5500" data-qty="800" data-amount="440.00"></div>
              <div class="price p-1 has-outstanding" data-rate="4500" data-qty="800" data-amount="360.00"></div>
            </div>
            <div class="service-wrapper">
              <span class="service-name">Boarding (Days)</span>
              <div class="price p-2 has-outstanding" data-rate="5000" data-qty="100" data-amount="50.00"></div>
              <div class="price p-3 has-outstanding" data-rate="5000" data-qty="100" data-amount="35.00"></div>
            </div>
          </div>
        </fieldset>"#;

    #[test]
    fn no_pricing_block_is_none() {
        assert_eq!(parse_pricing("<div>nothing here</div>").unwrap(), None);
    }

    #[test]
    fn single_night_item_decodes_scaled_values() {
        let pricing = parse_pricing(SINGLE_LINE).unwrap().unwrap();
        assert_eq!(pricing.total, 550.0);
        assert_eq!(
            pricing.line_items,
            vec![LineItem {
                service_name: "Boarding".into(),
                rate: 55.0,
                qty: 10.0,
                amount: 550.0,
            }]
        );
        assert_eq!(pricing.per_pet_rates, None);
        assert_eq!(
            classify_rates(&pricing.line_items),
            PetRate {
                night_rate: Some(55.0),
                day_rate: None,
            }
        );
    }

    #[test]
    fn multi_pet_entries_merge_by_service() {
        let pricing = parse_pricing(MULTI_PET).unwrap().unwrap();

        assert_eq!(pricing.total, 885.0);
        assert_eq!(pricing.line_items.len(), 2);
        assert_eq!(pricing.line_items[0].amount, 800.0);
        assert_eq!(pricing.line_items[0].rate, 55.0);
        assert_eq!(pricing.line_items[0].qty, 8.0);
        assert_eq!(pricing.line_items[1].amount, 85.0);
        assert_eq!(
            pricing.per_pet_rates,
            Some(vec![
                PetRate {
                    night_rate: Some(55.0),
                    day_rate: Some(50.0),
                },
                PetRate {
                    night_rate: Some(45.0),
                    day_rate: Some(50.0),
                },
            ])
        );
    }

    #[test]
    fn unreadable_total_is_an_error() {
        let html = SINGLE_LINE.replace("Total $550", "Total TBD");
        assert!(matches!(parse_pricing(&html), Err(Error::Parse(_))));
    }

    #[test]
    fn missing_qty_is_an_error() {
        let html = SINGLE_LINE.replace(r#" data-qty="1000""#, "");
        let err = parse_pricing(&html).unwrap_err();
        assert!(err.to_string().contains("data-qty"));
    }

    #[test]
    fn renamed_price_divs_are_an_error() {
        let html = SINGLE_LINE.replace("price p-0 has-outstanding", "pricing-row");
        assert!(matches!(parse_pricing(&html), Err(Error::Parse(_))));
    }

    #[test]
    fn comma_and_decimal_totals_parse() {
        let html = SINGLE_LINE.replace("Total $550", "Total $1,250.50");
        assert_eq!(parse_pricing(&html).unwrap().unwrap().total, 1250.5);
    }

    #[test]
    fn day_service_patterns() {
        assert!(is_day_service("Boarding (Days)"));
        assert!(is_day_service("Boarding (Day)"));
        assert!(is_day_service("DC full day"));
        assert!(is_day_service("d/c half day"));
        assert!(is_day_service("Doggy Daycare"));
        assert!(is_day_service("Day care"));
        assert!(!is_day_service("Boarding discounted nights for DC full-time"));
        assert!(!is_day_service("Boarding (Nights)"));
    }

    #[test]
    fn dc_mid_phrase_is_a_night_rate() {
        let items = vec![
            LineItem {
                service_name: "Boarding discounted nights for DC full-time".into(),
                rate: 45.0,
                qty: 5.0,
                amount: 225.0,
            },
            LineItem {
                service_name: "Boarding (Days)".into(),
                rate: 40.0,
                qty: 1.0,
                amount: 40.0,
            },
        ];
        assert_eq!(
            classify_rates(&items),
            PetRate {
                night_rate: Some(45.0),
                day_rate: Some(40.0),
            }
        );
    }
}
