//! Message bodies for challenge and vendor notifications.

use super::EmailMessage;
use crate::model::ChallengePurpose;
use chrono::Duration;

#[must_use]
pub fn challenge(
    to_email: &str,
    purpose: ChallengePurpose,
    code: &str,
    ttl: Duration,
) -> EmailMessage {
    let (subject, heading, intro) = match purpose {
        ChallengePurpose::AdminLogin => (
            "Admin verification code",
            "Admin login",
            "Use this code to finish signing in to the admin console.",
        ),
        ChallengePurpose::VendorLogin => (
            "Vendor login verification",
            "Vendor login",
            "Use this code to finish signing in to your vendor account.",
        ),
        ChallengePurpose::Registration => (
            "Verify your email",
            "Welcome",
            "Use this code to verify your email address and activate your account.",
        ),
        ChallengePurpose::PasswordReset => (
            "Reset your password",
            "Password reset",
            "Use this code to choose a new password. \
             If you did not ask for this, ignore this email.",
        ),
    };

    EmailMessage {
        to_email: to_email.to_string(),
        subject: subject.to_string(),
        html_body: format!(
            "<h2>{heading}</h2>\
             <p>{intro}</p>\
             <p style=\"font-size:24px;letter-spacing:4px\"><strong>{code}</strong></p>\
             <p>This code expires in {}.</p>",
            describe(ttl)
        ),
    }
}

#[must_use]
pub fn vendor_approved(to_email: &str, display_name: &str, login_url: &str) -> EmailMessage {
    EmailMessage {
        to_email: to_email.to_string(),
        subject: "Your vendor application was approved".to_string(),
        html_body: format!(
            "<h2>Congratulations, {}!</h2>\
             <p>Your vendor application has been approved. \
             You can now sign in to your vendor account.</p>\
             <p><a href=\"{}\">Sign in</a></p>",
            escape(display_name),
            escape(login_url)
        ),
    }
}

#[must_use]
pub fn vendor_rejected(
    to_email: &str,
    display_name: &str,
    reason: &str,
    apply_url: &str,
) -> EmailMessage {
    EmailMessage {
        to_email: to_email.to_string(),
        subject: "Your vendor application needs changes".to_string(),
        html_body: format!(
            "<h2>Hello {},</h2>\
             <p>Your vendor application was not approved.</p>\
             <p><strong>Reason:</strong> {}</p>\
             <p>You can update your details and submit again.</p>\
             <p><a href=\"{}\">Update application</a></p>",
            escape(display_name),
            escape(reason),
            escape(apply_url)
        ),
    }
}

fn describe(ttl: Duration) -> String {
    let minutes = ttl.num_minutes();
    if minutes >= 1 {
        let unit = if minutes == 1 { "minute" } else { "minutes" };
        format!("{minutes} {unit}")
    } else {
        format!("{} seconds", ttl.num_seconds().max(1))
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
