//! End-to-end flows through `Services` with in-memory storage.
//!
//! Each test drives the clock by hand so code lifetimes and cooldowns can be
//! checked to the second.

mod common;

use anyhow::{Context, Result};
use chrono::Duration;
use common::{TestContext, ADMIN_PASSWORD, PASSWORD};
use std::time::{Duration as StdDuration, Instant};
use turnstile::{
    clock::Clock,
    model::{ChallengePurpose, Role, VendorStatus},
    rewards::ClaimContext,
    service::{Acknowledged, LoginFlow, LoginOutcome},
    vendor::VendorApplication,
    AuthError,
};

fn application() -> VendorApplication {
    VendorApplication {
        business_name: "Acme Goods".to_string(),
        first_name: "Ada".to_string(),
        middle_name: Some("King".to_string()),
        last_name: "Lovelace".to_string(),
        phone: "+44 20 7946 0000".to_string(),
        address: "12 St James's Square, London".to_string(),
    }
}

#[tokio::test]
async fn vendor_code_accepted_until_five_minutes() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.verified_user("early@example.com", "early", true).await?;
    ctx.verified_user("late@example.com", "late", true).await?;

    let outcome = ctx
        .auth()
        .login(LoginFlow::Vendor, "early@example.com", PASSWORD)
        .await?;
    assert!(matches!(outcome, LoginOutcome::ChallengeSent(_)));
    let early_code = ctx.last_code("early@example.com")?;

    ctx.auth()
        .login(LoginFlow::Vendor, "late@example.com", PASSWORD)
        .await?;
    let late_code = ctx.last_code("late@example.com")?;

    ctx.clock.advance(Duration::minutes(4) + Duration::seconds(59));
    let grant = ctx
        .auth()
        .verify_login(LoginFlow::Vendor, "early@example.com", &early_code)
        .await?;
    assert_eq!(grant.principal.email, "early@example.com");

    ctx.clock.advance(Duration::seconds(2));
    let result = ctx
        .auth()
        .verify_login(LoginFlow::Vendor, "late@example.com", &late_code)
        .await;
    assert!(matches!(result, Err(AuthError::Expired)), "{result:?}");
    Ok(())
}

#[tokio::test]
async fn unknown_and_known_accounts_look_alike() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.verified_user("ada@example.com", "ada", false).await?;

    let wrong_password = ctx
        .auth()
        .login(LoginFlow::User, "ada@example.com", "not the password")
        .await;
    let unknown = ctx
        .auth()
        .login(LoginFlow::User, "ghost@example.com", PASSWORD)
        .await;
    let wrong_flow = ctx
        .auth()
        .login(LoginFlow::Admin, "ada@example.com", PASSWORD)
        .await;
    for result in [&wrong_password, &unknown, &wrong_flow] {
        assert!(matches!(result, Err(AuthError::InvalidCredentials)), "{result:?}");
    }

    for purpose in [
        ChallengePurpose::AdminLogin,
        ChallengePurpose::VendorLogin,
        ChallengePurpose::Registration,
        ChallengePurpose::PasswordReset,
    ] {
        let known = ctx.auth().resend_code(purpose, "ada@example.com").await;
        let missing = ctx.auth().resend_code(purpose, "ghost@example.com").await;
        assert_eq!(known, Acknowledged);
        assert_eq!(known, missing);
    }
    ctx.auth().settle().await;
    assert!(ctx.mail.sent_to("ghost@example.com").is_empty());

    let status = ctx
        .auth()
        .challenge_status(ChallengePurpose::PasswordReset, "ghost@example.com")
        .await?;
    assert!(status.allowed);
    assert_eq!(status.remaining_ms(), 0);
    Ok(())
}

#[tokio::test]
async fn admin_login_cooldown_reports_remaining_time() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.admin("root@example.com").await?;

    ctx.auth()
        .login(LoginFlow::Admin, "root@example.com", ADMIN_PASSWORD)
        .await?;
    ctx.clock.advance(Duration::minutes(10));

    let result = ctx
        .auth()
        .login(LoginFlow::Admin, "root@example.com", ADMIN_PASSWORD)
        .await;
    let remaining = result
        .as_ref()
        .err()
        .and_then(AuthError::remaining_ms)
        .context("second admin login should be throttled")?;
    assert_eq!(remaining, Duration::minutes(20).num_milliseconds());

    ctx.clock.advance(Duration::minutes(20));
    let outcome = ctx
        .auth()
        .login(LoginFlow::Admin, "root@example.com", ADMIN_PASSWORD)
        .await?;
    assert!(matches!(outcome, LoginOutcome::ChallengeSent(_)));
    Ok(())
}

#[tokio::test]
async fn password_reset_request_does_not_lock_out_admin_login() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.admin("root@example.com").await?;

    ctx.auth().request_password_reset("root@example.com").await;
    ctx.auth().settle().await;
    let reset_mail = ctx.mail.sent_to("root@example.com").len();
    assert_eq!(reset_mail, 1);

    ctx.clock.advance(Duration::seconds(5));
    let outcome = ctx
        .auth()
        .login(LoginFlow::Admin, "root@example.com", ADMIN_PASSWORD)
        .await?;
    assert!(matches!(outcome, LoginOutcome::ChallengeSent(_)));
    let code = ctx.last_code("root@example.com")?;

    // Each purpose keeps its own cooldown.
    let reset_status = ctx
        .auth()
        .challenge_status(ChallengePurpose::PasswordReset, "root@example.com")
        .await?;
    assert_eq!(reset_status.remaining_ms(), 55_000);

    // Further reset requests neither throttle the login nor replace its code.
    ctx.clock.advance(Duration::minutes(2));
    for _ in 0..3 {
        ctx.auth().request_password_reset("root@example.com").await;
    }
    ctx.auth().settle().await;
    assert_eq!(ctx.mail.sent_to("root@example.com").len(), reset_mail + 1);

    let admin_status = ctx
        .auth()
        .challenge_status(ChallengePurpose::AdminLogin, "root@example.com")
        .await?;
    assert!(!admin_status.allowed);
    let grant = ctx
        .auth()
        .verify_login(LoginFlow::Admin, "root@example.com", &code)
        .await?;
    assert_eq!(grant.principal.role, Role::Admin);
    Ok(())
}

#[tokio::test]
async fn resend_latency_does_not_depend_on_the_account() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.verified_user("ada@example.com", "ada", false).await?;
    ctx.mail.set_delay(Some(StdDuration::from_millis(800)));

    let started = Instant::now();
    let known = ctx.auth().request_password_reset("ada@example.com").await;
    let known_elapsed = started.elapsed();

    let started = Instant::now();
    let unknown = ctx.auth().request_password_reset("ghost@example.com").await;
    let unknown_elapsed = started.elapsed();

    assert_eq!(known, unknown);
    assert!(known_elapsed < StdDuration::from_millis(200), "{known_elapsed:?}");
    assert!(unknown_elapsed < StdDuration::from_millis(200), "{unknown_elapsed:?}");

    // The code still goes out once the background send finishes.
    assert_eq!(ctx.mail.sent_to("ada@example.com").len(), 1);
    ctx.auth().settle().await;
    assert_eq!(ctx.mail.sent_to("ada@example.com").len(), 2);
    assert!(ctx.mail.sent_to("ghost@example.com").is_empty());
    Ok(())
}

#[tokio::test]
async fn repeated_wrong_codes_lock_login_verification() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.verified_user("shop@example.com", "shop", true).await?;
    ctx.auth()
        .login(LoginFlow::Vendor, "shop@example.com", PASSWORD)
        .await?;
    let code = ctx.last_code("shop@example.com")?;
    let wrong = if code == "000000" { "111111" } else { "000000" };

    for _ in 0..turnstile::otp::DEFAULT_VERIFY_ATTEMPT_LIMIT {
        let result = ctx
            .auth()
            .verify_login(LoginFlow::Vendor, "shop@example.com", wrong)
            .await;
        assert!(matches!(result, Err(AuthError::Mismatch)), "{result:?}");
    }

    // Even the right code is refused during the lockout.
    let locked = ctx
        .auth()
        .verify_login(LoginFlow::Vendor, "shop@example.com", &code)
        .await;
    assert!(matches!(locked, Err(AuthError::TooManyAttempts { .. })), "{locked:?}");
    assert_eq!(
        locked.as_ref().err().and_then(AuthError::remaining_ms),
        Some(Duration::minutes(15).num_milliseconds())
    );

    // A fresh code does not reset the count.
    ctx.clock.advance(Duration::seconds(61));
    ctx.auth()
        .login(LoginFlow::Vendor, "shop@example.com", PASSWORD)
        .await?;
    let fresh = ctx.last_code("shop@example.com")?;
    let still_locked = ctx
        .auth()
        .verify_login(LoginFlow::Vendor, "shop@example.com", &fresh)
        .await;
    assert!(matches!(still_locked, Err(AuthError::TooManyAttempts { .. })));

    ctx.clock.advance(Duration::minutes(15));
    ctx.auth()
        .login(LoginFlow::Vendor, "shop@example.com", PASSWORD)
        .await?;
    let last = ctx.last_code("shop@example.com")?;
    let grant = ctx
        .auth()
        .verify_login(LoginFlow::Vendor, "shop@example.com", &last)
        .await?;
    assert_eq!(grant.principal.email, "shop@example.com");
    Ok(())
}

#[tokio::test]
async fn vendor_applicant_is_promoted_on_approval() -> Result<()> {
    let ctx = TestContext::new()?;
    let admin = ctx.admin("root@example.com").await?;
    let registration_token = ctx.verified_user("shop@example.com", "shop", true).await?;
    let applicant = ctx.auth().authenticate(&registration_token).await?;
    assert_eq!(applicant.role, Role::User);
    assert_eq!(applicant.vendor_status(), VendorStatus::New);

    // Applicants sign in through the vendor flow before they are approved.
    ctx.auth()
        .login(LoginFlow::Vendor, "shop@example.com", PASSWORD)
        .await?;
    let code = ctx.last_code("shop@example.com")?;
    let grant = ctx
        .auth()
        .verify_login(LoginFlow::Vendor, "shop@example.com", &code)
        .await?;

    let submitted = ctx.services.vendors.submit(&grant.principal, application()).await?;
    assert_eq!(submitted.vendor_status(), VendorStatus::Pending);
    let pending = ctx.services.vendors.list_pending(&admin).await?;
    assert_eq!(pending.len(), 1);

    let receipt = ctx.services.vendors.approve(&admin, submitted.id).await?;
    assert!(receipt.notified);
    assert_eq!(receipt.vendor.role, Role::Vendor);
    let approval_mail = ctx.mail.sent_to("shop@example.com");
    assert!(approval_mail
        .last()
        .is_some_and(|mail| mail.html_body.contains("https://shop.example/vendor/login")));

    // Tokens minted for the old role stop working.
    let stale = ctx.auth().authenticate(&grant.token).await;
    assert!(matches!(stale, Err(AuthError::InvalidToken)), "{stale:?}");

    let again = ctx.services.vendors.approve(&admin, submitted.id).await;
    assert!(matches!(again, Err(AuthError::InvalidTransition { .. })), "{again:?}");

    ctx.clock.advance(Duration::seconds(61));
    ctx.auth()
        .login(LoginFlow::Vendor, "shop@example.com", PASSWORD)
        .await?;
    let code = ctx.last_code("shop@example.com")?;
    let vendor = ctx
        .auth()
        .verify_login(LoginFlow::Vendor, "shop@example.com", &code)
        .await?;
    assert_eq!(vendor.principal.role, Role::Vendor);
    assert_eq!(vendor.expires_at, ctx.clock.now() + Duration::days(7));
    Ok(())
}

#[tokio::test]
async fn rejected_applicant_can_resubmit() -> Result<()> {
    let ctx = TestContext::new()?;
    let admin = ctx.admin("root@example.com").await?;
    let token = ctx.verified_user("shop@example.com", "shop", true).await?;
    let applicant = ctx.auth().authenticate(&token).await?;

    let submitted = ctx.services.vendors.submit(&applicant, application()).await?;
    let receipt = ctx
        .services
        .vendors
        .reject(&admin, submitted.id, Some("   ".to_string()))
        .await?;
    assert_eq!(receipt.vendor.vendor_status(), VendorStatus::Rejected);
    let view = ctx.services.vendors.status(&receipt.vendor)?;
    assert_eq!(
        view.rejection_reason.as_deref(),
        Some(turnstile::vendor::DEFAULT_REJECTION_REASON)
    );

    let resubmitted = ctx.services.vendors.submit(&receipt.vendor, application()).await?;
    assert_eq!(resubmitted.vendor_status(), VendorStatus::Pending);
    assert!(ctx.services.vendors.status(&resubmitted)?.rejection_reason.is_none());
    Ok(())
}

#[tokio::test]
async fn password_reset_round_trip() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.verified_user("ada@example.com", "ada", false).await?;

    ctx.auth().request_password_reset("ada@example.com").await;
    ctx.auth().settle().await;
    let code = ctx.last_code("ada@example.com")?;

    let wrong = ctx
        .auth()
        .reset_password("ada@example.com", "000000", "new secret")
        .await;
    if code != "000000" {
        assert!(matches!(wrong, Err(AuthError::Mismatch)), "{wrong:?}");
    }

    ctx.auth()
        .reset_password("ada@example.com", &code, "new secret")
        .await?;
    let old = ctx
        .auth()
        .login(LoginFlow::User, "ada@example.com", PASSWORD)
        .await;
    assert!(matches!(old, Err(AuthError::InvalidCredentials)));
    let new = ctx
        .auth()
        .login(LoginFlow::User, "ada@example.com", "new secret")
        .await?;
    assert!(matches!(new, LoginOutcome::Authenticated(_)));

    // The code is single use.
    let replay = ctx
        .auth()
        .reset_password("ada@example.com", &code, "another one")
        .await;
    assert!(matches!(replay, Err(AuthError::NoChallenge)), "{replay:?}");
    Ok(())
}

#[tokio::test]
async fn daily_claim_is_gated_for_a_day() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.services.rewards.seed_default_prizes().await?;
    let token = ctx.verified_user("ada@example.com", "ada", false).await?;
    let user = ctx.auth().authenticate(&token).await?;

    let first = ctx
        .services
        .rewards
        .claim(&user, 2, ClaimContext::default())
        .await?;
    assert!((1..=1000).contains(&first.points));
    assert_eq!(first.account.consecutive_days, 1);

    ctx.clock.advance(Duration::hours(23));
    let early = ctx
        .services
        .rewards
        .claim(&user, 0, ClaimContext::default())
        .await;
    assert_eq!(
        early.as_ref().err().and_then(AuthError::remaining_ms),
        Some(Duration::hours(1).num_milliseconds())
    );

    ctx.clock.advance(Duration::hours(1));
    let second = ctx
        .services
        .rewards
        .claim(&user, 4, ClaimContext::default())
        .await?;
    assert_eq!(second.account.consecutive_days, 2);
    assert_eq!(second.account.total_points, first.points + second.points);

    let history = ctx.services.rewards.history(&user).await?;
    assert_eq!(history.len(), 2);
    Ok(())
}
