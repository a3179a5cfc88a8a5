//! Integration test: verification token properties.
//!
//! Single use under concurrent confirms, invalidation on reissue, the
//! expiry boundary, throttled resend and the retention sweep.

use std::sync::{Arc, Barrier};

use portal_enroll::enrollment::EnrollOutcome;
use portal_enroll::EnrollError;
use portal_integration_tests::{enroll_request, Fixture, BASE_TIME};
use portal_types::token::TokenPurpose;
use portal_types::SECS_PER_DAY;

fn enroll_pending(fx: &Fixture, training: portal_types::TrainingId) -> String {
    match fx
        .portal
        .enroll(&enroll_request("12345", "ana@example.org", training), None)
        .expect("enroll")
    {
        EnrollOutcome::Pending(pending) => pending.poll_token,
        other => panic!("Expected pending, got {:?}", other),
    }
}

#[test]
fn concurrent_confirms_enroll_once() {
    let fx = Fixture::new();
    let training = fx.open_training("First Aid");
    let token = enroll_pending(&fx, training);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let portal = fx.portal.clone();
            let token = token.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                portal.confirm(&token, None)
            })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        match handle.join().expect("join") {
            Ok(confirmation) => {
                if confirmation.applied {
                    applied += 1;
                }
            }
            Err(EnrollError::TokenAlreadyUsed) => {}
            Err(other) => panic!("Unexpected error: {other}"),
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(fx.enrollment_count(training), 1);
}

#[test]
fn concurrent_consumes_have_one_winner() {
    let fx = Fixture::new();
    let training = fx.open_training("First Aid");
    let token = enroll_pending(&fx, training);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let tokens = fx.portal.tokens().clone();
            let token = token.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                tokens.consume(&token, None).expect("consume")
            })
        })
        .collect();
    let results: Vec<bool> = handles.into_iter().map(|h| h.join().expect("join")).collect();
    assert_eq!(results.iter().filter(|won| **won).count(), 1);
}

#[test]
fn reissue_invalidates_unconsumed_token() {
    let fx = Fixture::new();
    let training = fx.open_training("First Aid");
    let first = enroll_pending(&fx, training);
    let second = enroll_pending(&fx, training);

    let err = fx.portal.confirm(&first, None).expect_err("superseded");
    assert!(matches!(err, EnrollError::TokenAlreadyUsed));
    fx.portal.confirm(&second, None).expect("second confirms");
}

#[test]
fn expiry_boundary_is_exact() {
    let fx = Fixture::new();
    let student = fx
        .portal
        .identities()
        .resolve("12345", &enroll_request("12345", "ana@example.org", portal_types::TrainingId(1)).profile)
        .expect("student");

    let issued = fx
        .portal
        .tokens()
        .issue(student, "ana@example.org", TokenPurpose::Recovery, &serde_json::json!({}), 15, None)
        .expect("issue");

    fx.clock.set(issued.expires_at - 1);
    fx.portal
        .tokens()
        .validate(&issued.plaintext)
        .expect("one second before expiry");

    fx.clock.set(issued.expires_at + 1);
    assert!(matches!(
        fx.portal.tokens().validate(&issued.plaintext),
        Err(EnrollError::TokenExpired)
    ));
}

#[test]
fn resend_is_throttled_per_student_and_purpose() {
    let fx = Fixture::new();
    let training = fx.open_training("First Aid");
    let token = enroll_pending(&fx, training);

    fx.clock.advance(10);
    match fx.portal.resend(&token, None) {
        Err(EnrollError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, 50),
        other => panic!("Expected rate limit, got {:?}", other),
    }

    fx.clock.advance(50);
    let fresh = fx.portal.resend(&token, None).expect("resend allowed");
    assert_eq!(fresh.expires_at, BASE_TIME + 60 + 15 * 60);
}

#[test]
fn notifier_outage_leaves_resendable_token() {
    let fx = Fixture::new();
    let training = fx.open_training("First Aid");
    fx.outbox.fail_with(Some("relay unreachable"));

    let err = fx
        .portal
        .enroll(&enroll_request("12345", "ana@example.org", training), None)
        .expect_err("notifier down");
    assert!(err.is_internal());
    let poll_token = match err {
        EnrollError::Notifier { poll_token, .. } => poll_token.expect("poll token"),
        other => panic!("Expected notifier error, got {other}"),
    };

    fx.outbox.fail_with(None);
    fx.clock.advance(60);
    let fresh = fx.portal.resend(&poll_token, None).expect("resend");
    fx.portal.confirm(&fresh.poll_token, None).expect("confirm");
    let student = fx.student("12345").expect("student");
    assert!(fx.is_enrolled(student.id, training));
}

#[test]
fn sweep_deletes_only_past_retention() {
    let fx = Fixture::new();
    let training = fx.open_training("First Aid");
    let token = enroll_pending(&fx, training);
    let expires_at = BASE_TIME + 15 * 60;

    fx.clock.set(expires_at + 10 * SECS_PER_DAY);
    assert_eq!(fx.portal.sweep_expired().expect("sweep"), 0);
    assert!(fx.portal.tokens().find(&token).expect("find").is_some());

    fx.clock.set(expires_at + 31 * SECS_PER_DAY);
    assert_eq!(fx.portal.sweep_expired().expect("sweep"), 1);
    assert!(matches!(
        fx.portal.status(&token),
        Err(EnrollError::TokenNotFound)
    ));
}
