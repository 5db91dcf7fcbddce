use tether::Route;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Page {
    Dashboard,
    Accounts,
    Account(String),
    Clients,
    Client(String),
    Tokens,
    Requests,
    Login,
    NotFound(String),
}

impl Page {
    pub fn from_route(route: &Route) -> Self {
        let segments: Vec<&str> = route.path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => Page::Dashboard,
            ["accounts"] => Page::Accounts,
            ["accounts", id] => Page::Account(id.to_string()),
            ["clients"] => Page::Clients,
            ["clients", id] => Page::Client(id.to_string()),
            ["tokens"] => Page::Tokens,
            ["requests"] => Page::Requests,
            ["login"] => Page::Login,
            _ => Page::NotFound(route.path.clone()),
        }
    }

    pub fn path(&self) -> String {
        match self {
            Page::Dashboard => "/".to_string(),
            Page::Accounts => "/accounts".to_string(),
            Page::Account(id) => format!("/accounts/{id}"),
            Page::Clients => "/clients".to_string(),
            Page::Client(id) => format!("/clients/{id}"),
            Page::Tokens => "/tokens".to_string(),
            Page::Requests => "/requests".to_string(),
            Page::Login => "/login".to_string(),
            Page::NotFound(path) => path.clone(),
        }
    }

    pub fn requires_identity(&self) -> bool {
        !matches!(self, Page::Login | Page::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_round_trip_through_paths() {
        let pages = [
            Page::Dashboard,
            Page::Accounts,
            Page::Account("abc".to_string()),
            Page::Clients,
            Page::Client("xyz".to_string()),
            Page::Tokens,
            Page::Requests,
            Page::Login,
        ];
        for page in pages {
            assert_eq!(Page::from_route(&Route::parse(&page.path())), page);
        }
    }

    #[test]
    fn test_unknown_paths() {
        assert_eq!(
            Page::from_route(&Route::parse("/accounts/abc/edit")),
            Page::NotFound("/accounts/abc/edit".to_string())
        );
        assert_eq!(Page::from_route(&Route::parse("/tokens/?account=abc")), Page::Tokens);
        assert!(!Page::NotFound("/nope".to_string()).requires_identity());
        assert!(Page::Requests.requires_identity());
    }
}
