pub const ROUTE_HEALTHZ: &str = "/healthz";
pub const ROUTE_READYZ: &str = "/readyz";

pub const ROUTE_USERS: &str = "/users";
pub const ROUTE_USER: &str = "/users/:username";
pub const ROUTE_USER_INFO: &str = "/users/:username/info";
pub const ROUTE_USER_NOTIFICATIONS: &str = "/users/:username/notifications";

pub const ROUTE_EMAILS: &str = "/users/:username/emailaddresses";
pub const ROUTE_EMAIL: &str = "/users/:username/emailaddresses/:label";
pub const ROUTE_PHONES: &str = "/users/:username/phonenumbers";
pub const ROUTE_PHONE: &str = "/users/:username/phonenumbers/:label";
pub const ROUTE_ADDRESSES: &str = "/users/:username/addresses";
pub const ROUTE_ADDRESS: &str = "/users/:username/addresses/:label";
pub const ROUTE_BANKS: &str = "/users/:username/banks";
pub const ROUTE_BANK: &str = "/users/:username/banks/:label";

pub const ROUTE_ORGANIZATIONS: &str = "/users/:username/organizations";
pub const ROUTE_ORGANIZATION_ROLE: &str = "/users/:username/organizations/:globalid/roles/:role";

/// Accepts `{param}` templates and returns the router's `:param` form.
pub fn normalize_template(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            match segment
                .strip_prefix('{')
                .and_then(|rest| rest.strip_suffix('}'))
            {
                Some(name) => format!(":{name}"),
                None => segment.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brace_templates_normalize_to_router_form() {
        assert_eq!(
            normalize_template("/users/{username}/organizations/{globalid}/roles/{role}"),
            ROUTE_ORGANIZATION_ROLE
        );
        assert_eq!(normalize_template(ROUTE_EMAIL), ROUTE_EMAIL);
        assert_eq!(normalize_template("/users"), ROUTE_USERS);
    }
}
