use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Membership change. Adding to a group that doesn't exist creates it.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateGroupRequest {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

impl UpdateGroupRequest {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Trims, drops blanks and duplicates, keeps first-seen order.
pub fn normalize_usernames(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim();
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_deduplicated() {
        let names = vec![
            " jane ".to_string(),
            "bob".to_string(),
            "jane".to_string(),
            "".to_string(),
        ];
        assert_eq!(normalize_usernames(&names), vec!["jane", "bob"]);
    }

    #[test]
    fn update_defaults_to_empty() {
        let req: UpdateGroupRequest = serde_json::from_str("{}").unwrap();
        assert!(req.is_empty());
    }
}
