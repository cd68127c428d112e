// dkimsend – DKIM signing and submission of email messages
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseDomainError;

impl Display for ParseDomainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse domain name")
    }
}

impl Error for ParseDomainError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseSelectorError;

impl Display for ParseSelectorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse selector")
    }
}

impl Error for ParseSelectorError {}

/// An agent or user identifier, as used in the *i=* tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    // [ Local-part ] "@" domain-name
    pub local_part: Option<Box<str>>,
    pub domain_part: DomainName,
}

impl Identity {
    pub fn new(ident: &str) -> Result<Self, ParseDomainError> {
        let (local_part, domain) = match ident.rsplit_once('@') {
            Some((local_part, domain)) => {
                if local_part.is_empty() {
                    (None, domain)
                } else {
                    if !is_local_part(local_part) {
                        return Err(ParseDomainError);
                    }
                    (Some(local_part.into()), domain)
                }
            }
            None => return Err(ParseDomainError),
        };

        DomainName::new(domain).map(|domain_part| Self {
            local_part,
            domain_part,
        })
    }

    pub fn from_domain(domain_part: DomainName) -> Self {
        Self {
            local_part: None,
            domain_part,
        }
    }
}

impl FromStr for Identity {
    type Err = ParseDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ‘local-part’ is defined in RFC 5321, §4.1.2. Modifications for
// internationalisation are in RFC 6531, §3.3.
fn is_local_part(s: &str) -> bool {
    // See RFC 5321, §4.5.3.1.1.
    if s.len() > 64 {
        return false;
    }

    if s.starts_with('"') {
        is_quoted_string(s)
    } else {
        is_dot_string(s)
    }
}

fn is_quoted_string(s: &str) -> bool {
    fn is_qtext_smtp(c: char) -> bool {
        c == ' ' || c.is_ascii_graphic() && !matches!(c, '"' | '\\') || !c.is_ascii()
    }

    if s.starts_with('"') && s.ends_with('"') && s.len() >= 2 {
        let mut quoted = false;
        for c in s[1..(s.len() - 1)].chars() {
            if quoted {
                if c == ' ' || c.is_ascii_graphic() {
                    quoted = false;
                } else {
                    return false;
                }
            } else if c == '\\' {
                quoted = true;
            } else if !is_qtext_smtp(c) {
                return false;
            }
        }
        !quoted
    } else {
        false
    }
}

fn is_dot_string(s: &str) -> bool {
    // See RFC 5322, §3.2.3, with the modifications in RFC 6531, §3.3.
    fn is_atext(c: char) -> bool {
        c.is_ascii_alphanumeric()
            || matches!(
                c,
                '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '/' | '=' | '?' | '^' | '_'
                | '`' | '{' | '|' | '}' | '~'
            )
            || !c.is_ascii()
    }

    let mut dot = true;
    for c in s.chars() {
        if dot {
            if is_atext(c) {
                dot = false;
            } else {
                return false;
            }
        } else if c == '.' {
            dot = true;
        } else if !is_atext(c) {
            return false;
        }
    }
    !dot
}

/// A domain name, as used in the *d=* and *i=* tags.
///
/// The string is validated and then kept as-is. Equivalence comparison is
/// case-insensitive.
#[derive(Clone, Eq)]
pub struct DomainName(Box<str>);

impl DomainName {
    pub fn new(s: &str) -> Result<Self, ParseDomainError> {
        if s.ends_with('.') {
            return Err(ParseDomainError);
        }

        if is_valid_dns_name(s) {
            Ok(Self(s.into()))
        } else {
            Err(ParseDomainError)
        }
    }

    /// Compares this and the given domain for equivalence, in case-insensitive
    /// and IDNA-aware manner.
    pub fn eq_or_subdomain_of(&self, other: &DomainName) -> bool {
        if self == other {
            return true;
        }

        let (Ok(name), Ok(other)) = (
            idna::domain_to_ascii(&self.0),
            idna::domain_to_ascii(&other.0),
        ) else {
            return false;
        };

        if name.len() > other.len() {
            let len = name.len() - other.len();
            matches!(name.get(len..), Some(s) if s.eq_ignore_ascii_case(&other))
                && matches!(name.get(..len), Some(s) if s.ends_with('.'))
        } else {
            name.eq_ignore_ascii_case(&other)
        }
    }
}

impl Display for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &self.0)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq for DomainName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for DomainName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

impl FromStr for DomainName {
    type Err = ParseDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

fn is_valid_dns_name(s: &str) -> bool {
    fn is_tld(s: &str) -> bool {
        is_label(s) && !s.chars().all(|c: char| c.is_ascii_digit())
    }

    if !has_valid_domain_len(s) {
        return false;
    }

    let mut labels = s.split('.').rev().peekable();

    if matches!(labels.next(), Some(l) if !is_tld(l)) {
        return false;
    }
    if labels.peek().is_none() {
        return false;
    }

    labels.all(is_label)
}

// Note that tval-char forbids ; as that makes no sense in DKIM signatures.
fn is_label(s: &str) -> bool {
    has_valid_label_len(s)
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s.chars().all(is_tval_char)
}

fn is_tval_char(c: char) -> bool {
    // printable ASCII w/o ; or non-ASCII UTF-8
    matches!(c, '!'..=':' | '<'..='~') || !c.is_ascii()
}

const MAX_DOMAIN_LENGTH: usize = 253;

fn has_valid_domain_len(s: &str) -> bool {
    matches!(s.len(), 1..=MAX_DOMAIN_LENGTH)
}

fn has_valid_label_len(s: &str) -> bool {
    matches!(s.len(), 1..=63)
}

/// A selector, as used in the *s=* tag.
///
/// The string is validated and then kept as-is. Equivalence comparison is
/// case-insensitive.
#[derive(Clone, Eq)]
pub struct Selector(Box<str>);

impl Selector {
    pub fn new(s: &str) -> Result<Self, ParseSelectorError> {
        // lenient parsing of labels, allows things like "dkim_123"
        if !s.split('.').all(is_label) {
            return Err(ParseSelectorError);
        }

        idna::domain_to_ascii(s).map_err(|_| ParseSelectorError)?;
        if idna::domain_to_unicode(s).1.is_err() {
            return Err(ParseSelectorError);
        }

        Ok(Self(s.into()))
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &self.0)
    }
}

impl AsRef<str> for Selector {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

impl FromStr for Selector {
    type Err = ParseSelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
