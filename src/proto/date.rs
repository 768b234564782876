//! Cached `Date` header value, refreshed at most once per second.

use std::cell::RefCell;
use std::time::{SystemTime, UNIX_EPOCH};

thread_local! {
    static CACHED: RefCell<(u64, String)> = const { RefCell::new((0, String::new())) };
}

pub(crate) fn http_date() -> String {
    CACHED.with(|cache| {
        let mut cache = cache.borrow_mut();
        let now = SystemTime::now();
        let secs = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if cache.0 != secs || cache.1.is_empty() {
            *cache = (secs, httpdate::fmt_http_date(now));
        }
        cache.1.clone()
    })
}

#[test]
fn date_value_has_imf_fixdate_length() {
    // "Sun, 06 Nov 1994 08:49:37 GMT".len()
    assert_eq!(http_date().len(), 29);
}
