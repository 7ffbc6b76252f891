//! OpenAPI documentation for the waitlist API.
//!
//! Served as JSON at `/openapi.json` and rendered with Scalar at `/docs`.

use utoipa::{Modify, OpenApi};

use crate::{api, config::WaitlistConfig, email::describe_ttl, errors};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::waitlist::signup,
        api::handlers::waitlist::confirm,
        api::handlers::waitlist::resend,
        api::handlers::waitlist::status_page,
    ),
    components(
        schemas(
            api::models::waitlist::SignupRequest,
            api::models::waitlist::SignupResponse,
            api::models::waitlist::ResendRequest,
            api::models::waitlist::ResendResponse,
            errors::ErrorResponse,
        )
    ),
    tags(
        (name = "waitlist", description = "Double opt-in signup for early access.

1. `POST /waitlist` stores a pending signup and emails a confirmation link.
2. The link (`GET /confirm?token=...`) confirms the address and redirects to the status page.
3. `POST /waitlist/resend` emails a fresh link to an address that hasn't confirmed yet."),
    ),
    info(
        title = "Waitlist API",
        version = "1.0.0",
        description = "Early access waitlist with email confirmation.

## Errors

Failed requests return a JSON body with `ok: false` and a human readable `error`:

```json
{ \"ok\": false, \"error\": \"Invalid email\" }
```

Resend never fails and never reveals whether an address is on the list.",
    ),
)]
pub struct ApiDoc;

/// Fills in the parts of the waitlist tag that depend on configuration
struct WaitlistTerms<'a>(&'a WaitlistConfig);

impl Modify for WaitlistTerms<'_> {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let terms = format!(
            "Confirmation links expire after {}. Signups must attest to being at least {} years old \
             and consent to receiving updates; the exact wording shown to the user is stored with the signup.",
            describe_ttl(self.0.token_ttl),
            self.0.minimum_age,
        );

        for tag in openapi.tags.iter_mut().flatten().filter(|tag| tag.name == "waitlist") {
            let description = tag.description.get_or_insert_with(String::new);
            description.push_str("\n\n");
            description.push_str(&terms);
        }
    }
}

/// The document served at `/openapi.json` and `/docs`
pub fn api_doc(waitlist: &WaitlistConfig) -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    WaitlistTerms(waitlist).modify(&mut doc);
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_covers_waitlist_endpoints() {
        let doc = ApiDoc::openapi();

        for path in ["/waitlist", "/confirm", "/waitlist/resend", "/confirmed"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }

        let schemas = &doc.components.as_ref().unwrap().schemas;
        assert!(schemas.contains_key("SignupRequest"));
        assert!(schemas.contains_key("ErrorResponse"));
    }

    fn waitlist_tag(doc: &utoipa::openapi::OpenApi) -> String {
        doc.tags
            .iter()
            .flatten()
            .find(|tag| tag.name == "waitlist")
            .and_then(|tag| tag.description.clone())
            .unwrap()
    }

    #[test]
    fn test_waitlist_terms_follow_config() {
        let description = waitlist_tag(&api_doc(&WaitlistConfig::default()));
        assert!(description.starts_with("Double opt-in signup"));
        assert!(description.contains("expire after 24 hours"));
        assert!(description.contains("at least 16 years old"));

        let waitlist = WaitlistConfig {
            minimum_age: 18,
            token_ttl: std::time::Duration::from_secs(2 * 60 * 60),
            ..Default::default()
        };
        let description = waitlist_tag(&api_doc(&waitlist));
        assert!(description.contains("expire after 2 hours"));
        assert!(description.contains("at least 18 years old"));
        assert!(!description.contains("16"));
    }
}
