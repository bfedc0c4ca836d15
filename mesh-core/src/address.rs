use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

/// A bundle version, ordered by `(major, minor)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub u32, pub u32);

impl Version {
    pub fn major(self) -> u32 {
        self.0
    }

    pub fn minor(self) -> u32 {
        self.1
    }

    pub fn as_value(self) -> Value {
        json!([self.0, self.1])
    }

    pub fn from_value(value: &Value) -> Option<Version> {
        match value {
            Value::Array(items) if items.len() == 2 => {
                Some(Version(items[0].as_u64()? as u32, items[1].as_u64()? as u32))
            }
            Value::String(text) => text.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0, self.1)
    }
}

impl FromStr for Version {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (major, minor) = text
            .split_once('.')
            .ok_or_else(|| ParseError::new(text))?;
        Ok(Version(
            major.parse().map_err(|_| ParseError::new(text))?,
            minor.parse().map_err(|_| ParseError::new(text))?,
        ))
    }
}

/// Raised when an address (or version) cannot be parsed.
#[derive(Debug, Clone)]
pub struct ParseError(pub String);

impl ParseError {
    fn new(input: impl Into<String>) -> Self {
        ParseError(input.into())
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unparseable address: {:?}", self.0)
    }
}

impl std::error::Error for ParseError {}

/// The subject component of an address.
///
/// An endpoint that operates on a particular instance is attached with an
/// [`Subject::Expected`] placeholder; the placeholder renders only when an
/// override is supplied, which is how routing signatures acquire their
/// literal `id` tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Expected,
    Value(String),
}

impl Subject {
    pub fn value(&self) -> Option<&str> {
        match self {
            Subject::Expected => None,
            Subject::Value(id) => Some(id),
        }
    }
}

impl From<&str> for Subject {
    fn from(id: &str) -> Self {
        Subject::Value(id.to_string())
    }
}

impl From<String> for Subject {
    fn from(id: String) -> Self {
        Subject::Value(id)
    }
}

const BUNDLE_EXPR: &str = r"/(?P<bundle>[\w.]+)/(?P<major>\d+)\.(?P<minor>\d+)";

const ADDRESS_EXPR: &str = r"(?x)
    ^(?:(?P<endpoint>[A-Za-z]+)::)?
    %s
    (?P<bundle>(?:/[\w.]+/\d+\.\d+)+)
    (?:/(?P<resource>[\w.]+)
        (?:/(?P<subject>[-.:;\w]+)
            (?:/(?P<subresource>[\w.]+)
                (?:/(?P<subsubject>[-.:;\w]+))?
            )?
        )?
    )?
    (?:!(?P<format>\w+))?
    /?$";

static BUNDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(BUNDLE_EXPR).expect("bundle grammar must compile"));
static DEFAULT_PARSER: LazyLock<AddressParser> = LazyLock::new(|| AddressParser::new(None));

/// A compiled address grammar for a fixed static prefix.
///
/// Parsing is a two-stage match: the outer expression captures the
/// components, and the bundle-chain capture is re-scanned for its
/// `/name/M.m` segments.
#[derive(Debug, Clone)]
pub struct AddressParser {
    expr: Regex,
    prefix: Option<String>,
}

impl AddressParser {
    pub fn new(prefix: Option<&str>) -> Self {
        let escaped = prefix.map(regex::escape).unwrap_or_default();
        let expr = Regex::new(&ADDRESS_EXPR.replacen("%s", &escaped, 1))
            .expect("address grammar must compile");
        AddressParser {
            expr,
            prefix: prefix.map(str::to_string),
        }
    }

    pub fn parse(&self, text: &str) -> Result<Address, ParseError> {
        let captures = self.expr.captures(text).ok_or_else(|| ParseError::new(text))?;

        let mut bundle = Vec::new();
        for segment in BUNDLE_RE.captures_iter(&captures["bundle"]) {
            let version = Version(
                segment["major"].parse().map_err(|_| ParseError::new(text))?,
                segment["minor"].parse().map_err(|_| ParseError::new(text))?,
            );
            bundle.push((segment["bundle"].to_string(), version));
        }

        let component = |name: &str| captures.name(name).map(|m| m.as_str().to_string());
        Ok(Address {
            endpoint: component("endpoint"),
            prefix: self.prefix.clone(),
            bundle,
            resource: component("resource"),
            subject: component("subject").map(Subject::Value),
            subresource: component("subresource"),
            subsubject: component("subsubject").map(Subject::Value),
            format: component("format"),
        })
    }
}

/// An API request address.
///
/// Canonical textual form:
/// `[endpoint::][prefix]/bundle/M.m(/nested/M.m)*/resource[/subject[/subresource[/subsubject]]][!format]`
///
/// Addresses are value objects; [`Address::extend`] and the `with_*`
/// helpers produce new addresses rather than mutating the receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub endpoint: Option<String>,
    pub prefix: Option<String>,
    pub bundle: Vec<(String, Version)>,
    pub resource: Option<String>,
    pub subject: Option<Subject>,
    pub subresource: Option<String>,
    pub subsubject: Option<Subject>,
    pub format: Option<String>,
}

impl Address {
    /// Parse an address in canonical textual form.
    pub fn parse(text: &str) -> Result<Address, ParseError> {
        DEFAULT_PARSER.parse(text)
    }

    /// Parse an address carrying a static path prefix.
    pub fn parse_prefixed(text: &str, prefix: &str) -> Result<Address, ParseError> {
        AddressParser::new(Some(prefix)).parse(text)
    }

    /// Fill any missing components from `defaults`.
    pub fn with_defaults(mut self, defaults: &Address) -> Address {
        if self.endpoint.is_none() {
            self.endpoint = defaults.endpoint.clone();
        }
        if self.resource.is_none() {
            self.resource = defaults.resource.clone();
        }
        if self.subject.is_none() {
            self.subject = defaults.subject.clone();
        }
        if self.subresource.is_none() {
            self.subresource = defaults.subresource.clone();
        }
        if self.subsubject.is_none() {
            self.subsubject = defaults.subsubject.clone();
        }
        if self.format.is_none() {
            self.format = defaults.format.clone();
        }
        self
    }

    /// True when endpoint, bundle chain, and resource are all present.
    pub fn valid(&self) -> bool {
        self.endpoint.is_some() && !self.bundle.is_empty() && self.resource.is_some()
    }

    /// True when every component named in the mask (`e p b r s u v f`) is
    /// present on this address.
    pub fn require(&self, mask: &str) -> bool {
        mask.chars().all(|component| match component {
            'e' => self.endpoint.is_some(),
            'p' => self.prefix.is_some(),
            'b' => !self.bundle.is_empty(),
            'r' => self.resource.is_some(),
            's' => self.subject.is_some(),
            'u' => self.subresource.is_some(),
            'v' => self.subsubject.is_some(),
            'f' => self.format.is_some(),
            _ => false,
        })
    }

    /// Render the components selected by the mask, with optional overrides
    /// for placeholder subjects.
    pub fn render_with(
        &self,
        mask: &str,
        subject: Option<&str>,
        subsubject: Option<&str>,
    ) -> String {
        let mut out = String::new();

        if mask.contains('e') {
            if let Some(endpoint) = &self.endpoint {
                out.push_str(endpoint);
                out.push_str("::");
            }
        }

        if mask.contains('p') {
            if let Some(prefix) = &self.prefix {
                out.push_str(prefix);
            }
        }

        if mask.contains('b') {
            for (name, version) in &self.bundle {
                out.push('/');
                out.push_str(name);
                out.push('/');
                out.push_str(&version.to_string());
            }
        }

        if mask.contains('r') {
            if let Some(resource) = &self.resource {
                out.push('/');
                out.push_str(resource);
            }
        }

        if mask.contains('s') {
            match (&self.subject, subject) {
                (Some(Subject::Value(id)), override_id) => {
                    out.push('/');
                    out.push_str(override_id.unwrap_or(id));
                }
                (Some(Subject::Expected), Some(override_id)) => {
                    out.push('/');
                    out.push_str(override_id);
                }
                _ => {}
            }
        }

        if mask.contains('u') {
            if let Some(subresource) = &self.subresource {
                out.push('/');
                out.push_str(subresource);
            }
        }

        if mask.contains('v') {
            match (&self.subsubject, subsubject) {
                (Some(Subject::Value(id)), override_id) => {
                    out.push('/');
                    out.push_str(override_id.unwrap_or(id));
                }
                (Some(Subject::Expected), Some(override_id)) => {
                    out.push('/');
                    out.push_str(override_id);
                }
                _ => {}
            }
        }

        if mask.contains('f') {
            if let Some(format) = &self.format {
                out.push('!');
                out.push_str(format);
            }
        }

        out
    }

    /// Render the components selected by the mask.
    pub fn render(&self, mask: &str) -> String {
        self.render_with(mask, None, None)
    }

    /// The wire path, prefix included.
    pub fn prefixed_path(&self) -> String {
        self.render("pbrsuvf")
    }

    /// The endpoint-table lookup key: endpoint + bundle chain + resource.
    pub fn routing_key(&self) -> String {
        self.render("ebr")
    }

    /// Append a `(name, version)` segment to the bundle chain, returning a
    /// new address.
    pub fn extend(&self, name: impl Into<String>, version: Version) -> Address {
        let mut extended = self.clone();
        extended.bundle.push((name.into(), version));
        extended
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Address {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Address {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Address {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<Subject>) -> Address {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Address {
        self.format = Some(format.into());
        self
    }

    /// Mark the address as expecting a subject without binding one.
    pub fn expecting_subject(mut self) -> Address {
        self.subject = Some(Subject::Expected);
        self
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render("ebrsuvf"))
    }
}
