//! Minimal RDF model for device and sensor descriptions
//!
//! Only what the provider needs: IRIs, (typed) literals, triples and a prefix
//! table. Serialization lives in [`turtle`].

use std::fmt;

pub mod turtle;

pub use turtle::to_turtle;

/// XML Schema datatype namespace
pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";

/// Default base IRI for devices and sensors
pub const DEFAULT_BASE_IRI: &str = "http://itm.uni-luebeck.de/";

/// Object position of a triple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Iri(String),
    Literal {
        lexical: String,
        datatype: Option<String>,
    },
}

impl Term {
    pub fn iri<S: Into<String>>(iri: S) -> Self {
        Term::Iri(iri.into())
    }

    /// A plain string literal
    pub fn literal<S: Into<String>>(lexical: S) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            datatype: None,
        }
    }

    /// A literal typed with the full datatype IRI
    pub fn typed<S: Into<String>, D: Into<String>>(lexical: S, datatype: D) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            datatype: Some(datatype.into()),
        }
    }
}

/// A subject-predicate-object statement. Subject and predicate are full IRIs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: Term,
}

impl Triple {
    pub fn new<S: Into<String>, P: Into<String>>(subject: S, predicate: P, object: Term) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> <{}> ", self.subject, self.predicate)?;
        match &self.object {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::Literal {
                lexical,
                datatype: Some(datatype),
            } => write!(f, "\"{}\"^^<{datatype}>", turtle::escape(lexical)),
            Term::Literal {
                lexical,
                datatype: None,
            } => write!(f, "\"{}\"", turtle::escape(lexical)),
        }
    }
}

/// Ordered prefix table used to abbreviate IRIs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prefixes {
    entries: Vec<(String, String)>,
}

impl Prefixes {
    pub fn new() -> Self {
        Self::default()
    }

    /// `xsd` plus `itm` bound to `base_iri`
    pub fn standard(base_iri: &str) -> Self {
        let mut prefixes = Self::new();
        prefixes.insert("xsd", XSD);
        prefixes.insert("itm", base_iri);
        prefixes
    }

    /// Binds `prefix` to `namespace`, replacing an earlier binding.
    pub fn insert<P: Into<String>, N: Into<String>>(&mut self, prefix: P, namespace: N) {
        let prefix = prefix.into();
        let namespace = namespace.into();
        match self.entries.iter_mut().find(|(p, _)| *p == prefix) {
            Some(entry) => entry.1 = namespace,
            None => self.entries.push((prefix, namespace)),
        }
    }

    pub fn namespace(&self, prefix: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, namespace)| namespace.as_str())
    }

    /// Expands `prefix:local` into a full IRI.
    pub fn expand(&self, name: &str) -> Option<String> {
        let (prefix, local) = name.split_once(':')?;
        self.namespace(prefix)
            .map(|namespace| format!("{namespace}{local}"))
    }

    /// Shortens `iri` to `prefix:local` when the local part is a valid
    /// prefixed-name local part. The longest matching namespace wins.
    pub fn compact(&self, iri: &str) -> Option<String> {
        self.entries
            .iter()
            .filter_map(|(prefix, namespace)| {
                iri.strip_prefix(namespace.as_str())
                    .filter(|local| is_local_name(local))
                    .map(|local| (namespace.len(), format!("{prefix}:{local}")))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, name)| name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(prefix, namespace)| (prefix.as_str(), namespace.as_str()))
    }
}

// Conservative subset of the Turtle PN_LOCAL production
fn is_local_name(local: &str) -> bool {
    let mut chars = local.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_and_compact() {
        let prefixes = Prefixes::standard(DEFAULT_BASE_IRI);
        assert_eq!(
            prefixes.expand("itm:device05").as_deref(),
            Some("http://itm.uni-luebeck.de/device05")
        );
        assert_eq!(
            prefixes.compact("http://www.w3.org/2001/XMLSchema#dateTime").as_deref(),
            Some("xsd:dateTime")
        );
        // Slashes are not allowed in a local name
        assert_eq!(
            prefixes.compact("http://itm.uni-luebeck.de/groups/5/sensors/temperature"),
            None
        );
        assert_eq!(prefixes.compact("http://example.org/x"), None);
    }

    #[test]
    fn test_insert_replaces_binding() {
        let mut prefixes = Prefixes::standard(DEFAULT_BASE_IRI);
        prefixes.insert("itm", "http://example.org/");
        assert_eq!(prefixes.namespace("itm"), Some("http://example.org/"));
        assert_eq!(prefixes.iter().count(), 2);
    }

    #[test]
    fn test_triple_display_is_ntriples() {
        let triple = Triple::new(
            "http://example.org/s",
            "http://example.org/p",
            Term::typed("1.5", format!("{XSD}float")),
        );
        assert_eq!(
            triple.to_string(),
            "<http://example.org/s> <http://example.org/p> \"1.5\"^^<http://www.w3.org/2001/XMLSchema#float>"
        );
    }
}
