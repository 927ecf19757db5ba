/// Check whether `address` matches a relay rule.
///
/// Rules are compared case-insensitively. A rule with exactly one `*` matches
/// when the address starts with the text before it and ends with the text
/// after it (`*@example.com`, `dev-*`, `qa*@example.com`). Any other rule,
/// including one with several `*`, only matches literally.
pub fn matches_rule(address: &str, rule: &str) -> bool {
    let pattern = rule.to_lowercase();
    let address = address.to_lowercase();

    if pattern == address {
        return true;
    }

    let mut parts = pattern.split('*');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(prefix), Some(suffix), None) => {
            address.starts_with(prefix) && address.ends_with(suffix)
        }
        _ => false,
    }
}

/// Allow and deny lists applied to envelope recipients.
#[derive(Debug, Clone, Copy)]
pub struct RecipientRules<'a> {
    pub allow: &'a [String],
    pub deny: &'a [String],
}

impl<'a> RecipientRules<'a> {
    pub fn new(allow: &'a [String], deny: &'a [String]) -> Self {
        Self { allow, deny }
    }

    /// Deny rules win. When allow rules exist an address must match one.
    pub fn permits(&self, address: &str) -> bool {
        if self.deny.iter().any(|rule| matches_rule(address, rule)) {
            return false;
        }

        self.allow.is_empty() || self.allow.iter().any(|rule| matches_rule(address, rule))
    }

    pub fn filter(&self, recipients: &[String]) -> Vec<String> {
        recipients
            .iter()
            .filter(|r| self.permits(r))
            .cloned()
            .collect()
    }
}
