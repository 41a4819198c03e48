// ABOUTME: Selectors identify target endpoints by id, identifier, url, handle or pattern.
// ABOUTME: Resolution helpers turn a selector into one endpoint or a broadcast audience.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::endpoint::{EndpointId, EndpointInfo};
use crate::error::SwitchboardError;

/// Discriminant of a [`Selector`], used in coalescing keys and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorKind {
    Id,
    Identifier,
    Url,
    Handle,
    Pattern,
    All,
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelectorKind::Id => "id",
            SelectorKind::Identifier => "identifier",
            SelectorKind::Url => "url",
            SelectorKind::Handle => "handle",
            SelectorKind::Pattern => "pattern",
            SelectorKind::All => "all",
        };
        f.write_str(name)
    }
}

/// Predicate picking target endpoints.
///
/// `Id`, `Identifier`, `Url` and `Handle` are exact matches and address a
/// single endpoint. `Pattern` is matched against the identifier and the url;
/// together with `All` it is broadcast-style when used with `send`.
#[derive(Debug, Clone)]
pub enum Selector {
    Id(EndpointId),
    Identifier(String),
    Url(String),
    Handle(String),
    Pattern(Regex),
    All,
}

impl Selector {
    pub fn id(id: EndpointId) -> Self {
        Self::Id(id)
    }

    pub fn identifier(identifier: impl Into<String>) -> Self {
        Self::Identifier(identifier.into())
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    pub fn handle(handle: impl Into<String>) -> Self {
        Self::Handle(handle.into())
    }

    /// Compile a regex selector.
    pub fn pattern(pattern: &str) -> Result<Self, SwitchboardError> {
        Regex::new(pattern)
            .map(Self::Pattern)
            .map_err(|e| SwitchboardError::InvalidSelector(e.to_string()))
    }

    pub fn kind(&self) -> SelectorKind {
        match self {
            Selector::Id(_) => SelectorKind::Id,
            Selector::Identifier(_) => SelectorKind::Identifier,
            Selector::Url(_) => SelectorKind::Url,
            Selector::Handle(_) => SelectorKind::Handle,
            Selector::Pattern(_) => SelectorKind::Pattern,
            Selector::All => SelectorKind::All,
        }
    }

    /// The selector's value as a string (empty for `All`).
    pub fn value(&self) -> String {
        match self {
            Selector::Id(id) => id.to_string(),
            Selector::Identifier(s) | Selector::Url(s) | Selector::Handle(s) => s.clone(),
            Selector::Pattern(re) => re.as_str().to_string(),
            Selector::All => String::new(),
        }
    }

    /// Whether `send` fans out to every match instead of requiring exactly one.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Selector::Pattern(_) | Selector::All)
    }

    pub fn matches(&self, endpoint: &EndpointInfo) -> bool {
        match self {
            Selector::Id(id) => endpoint.id == *id,
            Selector::Identifier(identifier) => {
                endpoint.identifier.as_deref() == Some(identifier.as_str())
            }
            Selector::Url(url) => endpoint.url.as_deref() == Some(url.as_str()),
            Selector::Handle(handle) => endpoint.handle.as_deref() == Some(handle.as_str()),
            Selector::Pattern(re) => {
                endpoint.identifier.as_deref().is_some_and(|s| re.is_match(s))
                    || endpoint.url.as_deref().is_some_and(|s| re.is_match(s))
            }
            Selector::All => true,
        }
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.value() == other.value()
    }
}

impl Eq for Selector {}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::All => f.write_str("all"),
            other => write!(f, "{}:{}", other.kind(), other.value()),
        }
    }
}

impl FromStr for Selector {
    type Err = SwitchboardError;

    /// Parse `kind:value` (`id`, `identifier`, `url`, `handle`, `pattern`) or
    /// `all`. A string without a known prefix is an identifier.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SwitchboardError::InvalidSelector(
                "empty selector".to_string(),
            ));
        }
        if s == "all" {
            return Ok(Selector::All);
        }

        let Some((kind, value)) = s.split_once(':') else {
            return Ok(Selector::identifier(s));
        };

        match kind {
            "id" => value
                .parse::<u64>()
                .map(|raw| Selector::Id(EndpointId::new(raw)))
                .map_err(|_| {
                    SwitchboardError::InvalidSelector(format!("bad endpoint id '{value}'"))
                }),
            "identifier" => Ok(Selector::identifier(value)),
            "url" => Ok(Selector::url(value)),
            "handle" => Ok(Selector::handle(value)),
            "pattern" => Selector::pattern(value),
            _ => Ok(Selector::identifier(s)),
        }
    }
}

/// Every endpoint the selector matches, in iteration order.
pub fn select_all<'a, I>(selector: &Selector, endpoints: I) -> Vec<&'a EndpointInfo>
where
    I: IntoIterator<Item = &'a EndpointInfo>,
{
    endpoints
        .into_iter()
        .filter(|endpoint| selector.matches(endpoint))
        .collect()
}

/// Resolve a selector to exactly one endpoint.
pub fn select_one<'a, I>(
    selector: &Selector,
    endpoints: I,
) -> Result<&'a EndpointInfo, SwitchboardError>
where
    I: IntoIterator<Item = &'a EndpointInfo>,
{
    if matches!(selector, Selector::All) {
        return Err(SwitchboardError::InvalidSelector(
            "'all' cannot address a single endpoint".to_string(),
        ));
    }

    let matches = select_all(selector, endpoints);
    match matches.as_slice() {
        [] => Err(SwitchboardError::NotFound(selector.to_string())),
        [one] => Ok(*one),
        many => Err(SwitchboardError::Ambiguous {
            selector: selector.to_string(),
            count: many.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::ProcessKind;

    fn endpoints() -> Vec<EndpointInfo> {
        vec![
            EndpointInfo::new(EndpointId::new(1), ProcessKind::View)
                .with_identifier(Some("controller".to_string()))
                .with_url(Some("app://controller".to_string())),
            EndpointInfo::new(EndpointId::new(2), ProcessKind::View)
                .with_identifier(Some("output-left".to_string()))
                .with_handle(Some("win-2".to_string())),
            EndpointInfo::new(EndpointId::new(3), ProcessKind::Worker)
                .with_identifier(Some("output-right".to_string())),
        ]
    }

    #[test]
    fn test_exact_selectors() {
        let eps = endpoints();
        let found = select_one(&Selector::identifier("controller"), &eps).unwrap();
        assert_eq!(found.id, EndpointId::new(1));

        let found = select_one(&Selector::id(EndpointId::new(3)), &eps).unwrap();
        assert_eq!(found.identifier.as_deref(), Some("output-right"));

        let found = select_one(&Selector::handle("win-2"), &eps).unwrap();
        assert_eq!(found.id, EndpointId::new(2));

        let found = select_one(&Selector::url("app://controller"), &eps).unwrap();
        assert_eq!(found.id, EndpointId::new(1));
    }

    #[test]
    fn test_pattern_single_and_ambiguous() {
        let eps = endpoints();
        let single = Selector::pattern("^control").unwrap();
        assert_eq!(select_one(&single, &eps).unwrap().id, EndpointId::new(1));

        let many = Selector::pattern("^output").unwrap();
        let err = select_one(&many, &eps).unwrap_err();
        assert!(matches!(err, SwitchboardError::Ambiguous { count: 2, .. }));
        assert_eq!(select_all(&many, &eps).len(), 2);
    }

    #[test]
    fn test_not_found() {
        let eps = endpoints();
        let err = select_one(&Selector::identifier("missing"), &eps).unwrap_err();
        assert!(matches!(err, SwitchboardError::NotFound(_)));
    }

    #[test]
    fn test_all_is_broadcast_only() {
        let eps = endpoints();
        assert_eq!(select_all(&Selector::All, &eps).len(), 3);
        assert!(matches!(
            select_one(&Selector::All, &eps),
            Err(SwitchboardError::InvalidSelector(_))
        ));
        assert!(Selector::All.is_broadcast());
        assert!(!Selector::identifier("x").is_broadcast());
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            "id:4".parse::<Selector>().unwrap(),
            Selector::id(EndpointId::new(4))
        );
        assert_eq!(
            "output".parse::<Selector>().unwrap(),
            Selector::identifier("output")
        );
        assert_eq!("all".parse::<Selector>().unwrap(), Selector::All);
        assert_eq!(
            "pattern:^out".parse::<Selector>().unwrap().kind(),
            SelectorKind::Pattern
        );
        assert!("id:abc".parse::<Selector>().is_err());
        assert!("pattern:(".parse::<Selector>().is_err());
        assert!("".parse::<Selector>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let selector = Selector::url("app://main");
        let parsed: Selector = selector.to_string().parse().unwrap();
        assert_eq!(parsed, selector);
    }
}
