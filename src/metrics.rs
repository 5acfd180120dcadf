use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, TextEncoder, opts, register_histogram,
    register_int_counter, register_int_counter_vec,
};

pub static SIGNUPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "chatter_signups_total",
        "Total number of accounts created through signup"
    ))
    .unwrap()
});

/// Login attempts by `outcome` (`success` | `failure`).
pub static LOGINS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("chatter_logins_total", "Total number of login attempts"),
        &["outcome"]
    )
    .unwrap()
});

pub static GUEST_ACCOUNTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "chatter_guest_accounts_total",
        "Total number of guest accounts provisioned"
    ))
    .unwrap()
});

pub static ONBOARDING_MESSAGES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "chatter_onboarding_messages_total",
        "Total number of companion onboarding messages recorded"
    ))
    .unwrap()
});

/// Companion replies by `source` (`generative` | `fallback`).
pub static COMPANION_REPLIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "chatter_companion_replies_total",
            "Total number of companion replies produced"
        ),
        &["source"]
    )
    .unwrap()
});

pub static CAPTCHA_CHALLENGES_ISSUED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "chatter_captcha_challenges_issued_total",
        "Total number of captcha challenges issued"
    ))
    .unwrap()
});

pub static GENERATIVE_REPLY_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "chatter_generative_reply_seconds",
        "Latency of generative backend calls, including failed ones"
    )
    .unwrap()
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
