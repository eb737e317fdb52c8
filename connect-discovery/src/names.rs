//! Friendly-name extraction and hint matching
//!
//! Receivers expose several names: the `remoteName`/`displayName` reported by
//! `getInfo`, a handful of TXT keys on the advertisement, and the mDNS
//! instance name, which often carries a MAC address or serial suffix.
//! [`friendly_names`] orders them by how likely they are to match what the
//! Spotify app shows the user.

use std::collections::HashMap;

use zeroconf_client::DeviceInfo;

/// TXT keys carrying a human-readable name, in priority order
pub const TXT_NAME_KEYS: [&str; 4] = ["FriendlyName", "fn", "DeviceName", "name"];

/// How well a set of names matched a hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    /// A name contains the hint
    Partial,
    /// Case-insensitive equality
    Exact,
}

/// Build the ordered, de-duplicated list of name candidates for a device.
///
/// Priority: getInfo `remoteName`, getInfo `displayName`, TXT name keys,
/// cleaned instance name, raw instance name. Empty values are skipped.
pub fn friendly_names(
    info: Option<&DeviceInfo>,
    txt: &HashMap<String, String>,
    instance_name: &str,
) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    if let Some(info) = info {
        candidates.extend(info.name_candidates());
    }

    for key in TXT_NAME_KEYS {
        if let Some(value) = txt_value(txt, key) {
            candidates.push(value.to_string());
        }
    }

    candidates.push(clean_instance_name(instance_name));
    candidates.push(instance_name.trim().to_string());

    let mut names: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }
        if !names.iter().any(|n| n.eq_ignore_ascii_case(candidate)) {
            names.push(candidate.to_string());
        }
    }
    names
}

/// Case-insensitive TXT lookup; DNS-SD keys are case-insensitive.
pub fn txt_value<'a>(txt: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    txt.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

/// Strip technical suffixes from an mDNS instance name.
///
/// Removes, repeatedly: a trailing parenthesised or bracketed group, a
/// trailing `-`/`_`/space separated run of 8+ hex digits, and a trailing MAC
/// address. Falls back to the trimmed input if nothing meaningful remains.
pub fn clean_instance_name(raw: &str) -> String {
    let mut name = raw.trim().to_string();

    loop {
        let before = name.len();
        name = strip_bracket_group(&name);
        name = strip_mac_suffix(&name);
        name = strip_hex_suffix(&name);
        name = name
            .trim_end_matches(|c: char| c == '-' || c == '_' || c.is_whitespace())
            .to_string();
        if name.len() == before {
            break;
        }
    }

    if name.is_empty() {
        raw.trim().to_string()
    } else {
        name
    }
}

fn strip_bracket_group(name: &str) -> String {
    let trimmed = name.trim_end();
    let open = match trimmed.chars().last() {
        Some(')') => '(',
        Some(']') => '[',
        _ => return name.to_string(),
    };
    match trimmed.rfind(open) {
        Some(idx) if idx > 0 => trimmed[..idx].trim_end().to_string(),
        _ => name.to_string(),
    }
}

fn strip_hex_suffix(name: &str) -> String {
    let Some(idx) = name.rfind(|c: char| c == '-' || c == '_' || c == ' ') else {
        return name.to_string();
    };
    let suffix = &name[idx + 1..];
    if idx > 0 && suffix.len() >= 8 && suffix.chars().all(|c| c.is_ascii_hexdigit()) {
        name[..idx].to_string()
    } else {
        name.to_string()
    }
}

fn strip_mac_suffix(name: &str) -> String {
    // aa:bb:cc:dd:ee:ff is 17 characters
    if name.len() <= 17 || !name.is_char_boundary(name.len() - 17) {
        return name.to_string();
    }
    let (head, tail) = name.split_at(name.len() - 17);
    if is_mac(tail) {
        head.to_string()
    } else {
        name.to_string()
    }
}

fn is_mac(candidate: &str) -> bool {
    let sep = if candidate.contains(':') { ':' } else { '-' };
    let parts: Vec<&str> = candidate.split(sep).collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Match a hint against a candidate list: exact first, then a name containing the hint.
///
/// A hint longer than every name never matches: "Kitchen Speaker" must not
/// resolve to a receiver called "Kitchen".
pub fn match_hint(hint: &str, names: &[String]) -> Option<MatchKind> {
    let hint = hint.trim().to_lowercase();
    if hint.is_empty() {
        return None;
    }

    let lowered: Vec<String> = names.iter().map(|n| n.trim().to_lowercase()).collect();
    if lowered.iter().any(|n| *n == hint) {
        return Some(MatchKind::Exact);
    }
    if lowered
        .iter()
        .any(|n| !n.is_empty() && n.contains(&hint))
    {
        return Some(MatchKind::Partial);
    }
    None
}

/// Cloud device names are compared case-insensitively and exactly.
pub fn names_equal(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
