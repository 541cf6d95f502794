//! Keeps the owner's personal data out of anything a peer sends or gets.

use serde_json::Value;

use crate::config::OwnerProtectionConfig;

/// What kind of owner data tripped the shield. The matched value itself is
/// never reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerDataKind {
    Name,
    Email,
    Phone,
    Term,
}

/// Case-insensitive substring scan over every string (and object key) in
/// a JSON payload.
#[derive(Debug, Clone, Default)]
pub struct OwnerShield {
    terms: Vec<(OwnerDataKind, String)>,
    phone_digits: Option<String>,
}

impl OwnerShield {
    pub fn new(config: &OwnerProtectionConfig) -> Self {
        let mut terms = Vec::new();
        let mut push = |kind, value: &Option<String>| {
            if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                terms.push((kind, v.to_lowercase()));
            }
        };
        push(OwnerDataKind::Name, &config.name);
        push(OwnerDataKind::Email, &config.email);
        push(OwnerDataKind::Phone, &config.phone);
        for term in &config.extra_terms {
            push(OwnerDataKind::Term, &Some(term.clone()));
        }

        // "+1 (555) 010-0000" and "15550100000" are the same number.
        let phone_digits = config
            .phone
            .as_deref()
            .map(digits)
            .filter(|d| d.len() >= 6);

        Self {
            terms,
            phone_digits,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.terms.is_empty()
    }

    /// First kind of owner data found in `payload`, if any.
    pub fn scan(&self, payload: &Value) -> Option<OwnerDataKind> {
        if !self.is_active() {
            return None;
        }
        match payload {
            Value::String(s) => self.scan_str(s),
            Value::Array(items) => items.iter().find_map(|v| self.scan(v)),
            Value::Object(map) => map
                .iter()
                .find_map(|(k, v)| self.scan_str(k).or_else(|| self.scan(v))),
            // Numbers can carry a phone number too.
            Value::Number(n) => self.scan_str(&n.to_string()),
            Value::Bool(_) | Value::Null => None,
        }
    }

    pub fn contains_owner_data(&self, payload: &Value) -> bool {
        self.scan(payload).is_some()
    }

    fn scan_str(&self, s: &str) -> Option<OwnerDataKind> {
        let lower = s.to_lowercase();
        if let Some((kind, _)) = self.terms.iter().find(|(_, t)| lower.contains(t.as_str())) {
            return Some(*kind);
        }
        match &self.phone_digits {
            Some(phone) if digits(s).contains(phone.as_str()) => Some(OwnerDataKind::Phone),
            _ => None,
        }
    }
}

fn digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shield() -> OwnerShield {
        OwnerShield::new(&OwnerProtectionConfig {
            name: Some("Ada Lovelace".into()),
            email: Some("ada@example.com".into()),
            phone: Some("+1 (555) 010-4242".into()),
            extra_terms: vec!["Analytical Engine".into(), "  ".into()],
        })
    }

    #[test]
    fn test_detects_each_kind() {
        let s = shield();
        assert_eq!(s.scan(&json!("hi ada lovelace")), Some(OwnerDataKind::Name));
        assert_eq!(
            s.scan(&json!({"to": ["x", "ADA@EXAMPLE.COM"]})),
            Some(OwnerDataKind::Email)
        );
        assert_eq!(s.scan(&json!({"n": "15550104242"})), Some(OwnerDataKind::Phone));
        assert_eq!(s.scan(&json!({"n": 15550104242u64})), Some(OwnerDataKind::Phone));
        assert_eq!(
            s.scan(&json!({"the analytical engine": true})),
            Some(OwnerDataKind::Term)
        );
        assert_eq!(s.scan(&json!({"city": "London", "n": 3})), None);
    }

    #[test]
    fn test_empty_config_is_inert() {
        let s = OwnerShield::new(&OwnerProtectionConfig::default());
        assert!(!s.is_active());
        assert!(!s.contains_owner_data(&json!("Ada Lovelace")));
    }
}
