use super::handlers::{admin, auth, health, rewards, vendor};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` document.
pub(crate) fn api_router() -> OpenApiRouter {
    // Handlers sharing a path must share a `routes!` call.
    OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::register))
        .routes(routes!(auth::verify_email))
        .routes(routes!(auth::resend_verification))
        .routes(routes!(auth::verification_status))
        .routes(routes!(auth::login))
        .routes(routes!(auth::forgot_password))
        .routes(routes!(auth::reset_password))
        .routes(routes!(auth::logout))
        .routes(routes!(auth::me, auth::update_me))
        .routes(routes!(admin::login))
        .routes(routes!(admin::verify))
        .routes(routes!(admin::resend))
        .routes(routes!(admin::otp_status))
        .routes(routes!(admin::users))
        .routes(routes!(admin::admins))
        .routes(routes!(admin::pending_vendors))
        .routes(routes!(admin::approved_vendors))
        .routes(routes!(admin::approve_vendor))
        .routes(routes!(admin::reject_vendor))
        .routes(routes!(vendor::login))
        .routes(routes!(vendor::verify))
        .routes(routes!(vendor::resend))
        .routes(routes!(vendor::otp_status))
        .routes(routes!(vendor::submit_application, vendor::application_status))
        .routes(routes!(rewards::claim))
        .routes(routes!(rewards::status))
        .routes(routes!(rewards::points))
        .routes(routes!(rewards::prizes))
        .routes(routes!(rewards::history))
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    // Tags live on the base document; `routes` only merges paths and schemas.
    OpenApiBuilder::new().info(info).tags(Some(tags())).build()
}

fn tags() -> Vec<Tag> {
    [
        ("turnstile", "Identity, challenge gating and vendor onboarding API"),
        ("auth", "Registration, login, password reset and profile"),
        ("admin", "Admin login and vendor review"),
        ("vendor", "Vendor login and applications"),
        ("rewards", "Daily point claims and prizes"),
    ]
    .into_iter()
    .map(|(name, description)| {
        let mut tag = Tag::new(name);
        tag.description = Some(description.to_string());
        tag
    })
    .collect()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    fn non_empty(value: &str) -> Option<&str> {
        Some(value).filter(|value| !value.is_empty())
    }
    match author.split_once('<') {
        Some((name, email)) => (
            non_empty(name.trim()),
            non_empty(email.trim_end_matches('>').trim()),
        ),
        None => (non_empty(author.trim()), None),
    }
}
