use std::fmt::Write;

use super::{Prefixes, Term, Triple};

/// Serializes `triples` as Turtle.
///
/// Prefix declarations come first, then one statement block per run of
/// triples sharing a subject. IRIs are abbreviated through `prefixes` where
/// possible and written in full otherwise.
pub fn to_turtle(triples: &[Triple], prefixes: &Prefixes) -> Vec<u8> {
    let mut out = String::new();

    for (prefix, namespace) in prefixes.iter() {
        let _ = writeln!(out, "@prefix {prefix}: <{namespace}>.");
    }
    if !out.is_empty() && !triples.is_empty() {
        out.push('\n');
    }

    let mut subject: Option<&str> = None;
    for triple in triples {
        match subject {
            Some(current) if current == triple.subject => out.push_str(";\n    "),
            Some(_) => {
                out.push_str(".\n");
                write_subject(&mut out, &triple.subject, prefixes);
            }
            None => write_subject(&mut out, &triple.subject, prefixes),
        }
        subject = Some(triple.subject.as_str());

        out.push_str(&iri(&triple.predicate, prefixes));
        out.push(' ');
        out.push_str(&object(&triple.object, prefixes));
    }
    if subject.is_some() {
        out.push_str(".\n");
    }

    out.into_bytes()
}

fn write_subject(out: &mut String, subject: &str, prefixes: &Prefixes) {
    out.push_str(&iri(subject, prefixes));
    out.push(' ');
}

fn iri(iri: &str, prefixes: &Prefixes) -> String {
    prefixes
        .compact(iri)
        .unwrap_or_else(|| format!("<{iri}>"))
}

fn object(term: &Term, prefixes: &Prefixes) -> String {
    match term {
        Term::Iri(value) => iri(value, prefixes),
        Term::Literal {
            lexical,
            datatype: Some(datatype),
        } => format!("\"{}\"^^{}", escape(lexical), iri(datatype, prefixes)),
        Term::Literal {
            lexical,
            datatype: None,
        } => format!("\"{}\"", escape(lexical)),
    }
}

/// Escapes a string for use inside a double-quoted literal.
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c => escaped.push(c),
        }
    }
    escaped
}
