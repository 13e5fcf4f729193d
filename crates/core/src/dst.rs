//! Daylight-saving gate for cron-style work methods.
//!
//! Cron producers that fire on a fixed UTC schedule can enqueue two copies of
//! a job, one tagged `"dst": true` and one tagged `"dst": false`; the gate
//! runs only the copy that matches the current DST state of the configured
//! zone, so the job lands at the same local wall-clock time all year.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};
use serde_json::Value;

use crate::error::DrudgeError;
use crate::message::Params;
use crate::method::WorkMethod;

const DST_PARAM: &str = "dst";

/// Decides whether a message should run given the zone's DST state.
#[derive(Debug, Clone, Copy)]
pub struct DstGate {
    tz: Tz,
}

impl DstGate {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn is_dst(&self, now: DateTime<Utc>) -> bool {
        let offset = self.tz.offset_from_utc_datetime(&now.naive_utc());
        offset.dst_offset() != TimeDelta::zero()
    }

    /// `Ok(true)` if the message should run at `now`.
    ///
    /// Without a `dst` parameter the message always runs. A `dst` value that
    /// is not a boolean is rejected.
    pub fn admits(&self, params: &Params, now: DateTime<Utc>) -> Result<bool, DrudgeError> {
        match params.get(DST_PARAM) {
            None => Ok(true),
            Some(Value::Bool(required)) => Ok(*required == self.is_dst(now)),
            Some(Value::Null) => Err(DrudgeError::MalformedMessage(
                "unexpected null value for dst".into(),
            )),
            Some(other) => Err(DrudgeError::MalformedMessage(format!(
                "unexpected value for dst, expected boolean, got {other}"
            ))),
        }
    }
}

impl WorkMethod {
    /// Wrap `inner` so it only runs when the message's `dst` flag matches
    /// the current DST state in `tz`. Gated-out messages report skipped.
    pub fn dst_gated(name: impl Into<String>, tz: Tz, inner: WorkMethod) -> Self {
        let gate = DstGate::new(tz);
        WorkMethod::new(name, move |params: Params| {
            let decision = gate.admits(&params, Utc::now());
            let inner = inner.clone();
            async move {
                if decision? {
                    inner.call(params).await
                } else {
                    Ok(false)
                }
            }
        })
    }
}
