//! Notification gate
//!
//! Decides whether a recipient should be emailed at all. Precedence:
//! per-item override, then the user's own default, then the org default.

pub fn should_notify(org_default: bool, user_pref: Option<bool>, item_pref: Option<bool>) -> bool {
	item_pref.or(user_pref).unwrap_or(org_default)
}


// vim: ts=4
