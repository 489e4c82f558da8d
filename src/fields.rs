//! Pure parsers pulling identifiers, coordinates and addresses out of free-form cells.
use regex::Regex;
use std::sync::LazyLock;

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Tried in order; the first match wins.
static COORDINATE_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(\d+\.\d+)[NS]?\s*,\s*(\d+\.\d+)[EW]?").unwrap(),
        Regex::new(r"(\d+\.\d+)\s*,\s*(\d+\.\d+)").unwrap(),
        Regex::new(r"(\d+\.\d+)\s+(\d+\.\d+)").unwrap(),
    ]
});

/// Removed from address text before cleanup.
static EMBEDDED_COORDINATES: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        Regex::new(r"\b\d+\.\d+[NS]?\s*,\s*\d+\.\d+[EW]?\b").unwrap(),
        Regex::new(r"\b\d+\.\d+\s*,\s*\d+\.\d+\b").unwrap(),
        Regex::new(r"\b\d+\.\d+,\d+\.\d+\b").unwrap(),
        Regex::new(r"\b\d+\.\d+\s+\d+\.\d+\b").unwrap(),
    ]
});

static REPEATED_COMMAS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*,+").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static INNER_COMPASS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+[NSEW]\s+").unwrap());
static LEADING_COMPASS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[NSEW]\s+").unwrap());
static TRAILING_COMPASS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+[NSEW]$").unwrap());

/// Addresses this short are leftovers of a stripped coordinate, not text.
const MIN_ADDRESS_CHARS: usize = 4;

/// First maximal digit run, or the input unchanged when it has no digits.
pub fn car_number(identifier: &str) -> String {
    DIGITS
        .find(identifier)
        .map(|digits| digits.as_str().to_owned())
        .unwrap_or_else(|| identifier.to_owned())
}

/// Every digit run concatenated in order, or the input unchanged when it has no digits.
pub fn car_plate(identifier: &str) -> String {
    let digits: String = DIGITS.find_iter(identifier).map(|digits| digits.as_str()).collect();
    if digits.is_empty() {
        identifier.to_owned()
    } else {
        digits
    }
}

/// Normalizes the first coordinate pair found to `"lat,lon"`; empty when none matches.
pub fn extract_coordinates(text: &str) -> String {
    COORDINATE_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(text))
        .map(|captures| format!("{},{}", &captures[1], &captures[2]))
        .unwrap_or_default()
}

/// Returns the textual part of an address cell with coordinates and compass letters removed.
pub fn extract_address_text(text: &str) -> String {
    let mut address = text.to_owned();
    for pattern in EMBEDDED_COORDINATES.iter() {
        address = pattern.replace_all(&address, "").into_owned();
    }
    let address = REPEATED_COMMAS.replace_all(&address, ",");
    let address = WHITESPACE.replace_all(&address, " ");
    let address = address.trim_matches(|c| c == ',' || c == ' ');
    let address = INNER_COMPASS.replace_all(address, " ");
    let address = LEADING_COMPASS.replace_all(&address, "");
    let address = TRAILING_COMPASS.replace_all(&address, "");
    let address = address.trim();
    if address.chars().count() < MIN_ADDRESS_CHARS {
        String::new()
    } else {
        address.to_owned()
    }
}

/// An ordered list of sources for one field; the first non-empty extraction wins.
///
/// ```
/// use xtractor::fields::extract_coordinates;
/// use xtractor::fields::FallbackChain;
///
/// let chain = FallbackChain::new(extract_coordinates);
/// assert_eq!(chain.resolve(["", "Depot 30.1,31.2"]), "30.1,31.2");
/// ```
pub struct FallbackChain {
    extractor: fn(&str) -> String,
}

impl FallbackChain {
    pub fn new(extractor: fn(&str) -> String) -> FallbackChain {
        FallbackChain { extractor }
    }

    pub fn resolve<'a>(&self, sources: impl IntoIterator<Item = &'a str>) -> String {
        sources
            .into_iter()
            .filter(|source| !source.trim().is_empty())
            .map(self.extractor)
            .find(|value| !value.is_empty())
            .unwrap_or_default()
    }
}
