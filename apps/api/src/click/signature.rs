use md5::{Digest, Md5};

use crate::click::types::ClickRequest;

/// `md5(click_trans_id + service_id + secret_key + merchant_trans_id +
/// [merchant_prepare_id] + amount + action + sign_time)` as lowercase hex.
/// The prepare id only takes part in complete callbacks.
pub fn expected_signature(req: &ClickRequest, secret_key: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(req.click_trans_id.as_bytes());
    hasher.update(req.service_id.as_bytes());
    hasher.update(secret_key.as_bytes());
    hasher.update(req.merchant_trans_id.as_bytes());
    if let Some(prepare_id) = &req.merchant_prepare_id {
        hasher.update(prepare_id.as_bytes());
    }
    hasher.update(req.amount.as_bytes());
    hasher.update(req.action.to_string().as_bytes());
    hasher.update(req.sign_time.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_signature(req: &ClickRequest, secret_key: &str) -> bool {
    expected_signature(req, secret_key).eq_ignore_ascii_case(req.sign_string.trim())
}
