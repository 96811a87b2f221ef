//! C4: wire protocol codec — JSON envelopes in, `Msg` values out, and back.
//!
//! Grounded on `client-rs/src/ws_client.rs`'s `JsonRequestSend`/
//! `JsonRequestSendParams` envelope structs, generalized from that crate's
//! single fixed RPC shape to the `{"t":"d"|"c","d":...}` envelope of spec
//! §4.4/§6. The codec is synchronous and side-effect-free, same as the
//! teacher's `serde_json::to_string`/`from_str` calls — no I/O happens here,
//! only in `transport.rs`.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::WebcomError;
use crate::path::Path;

/// A data-plane action tag (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Listen,
    Unlisten,
    Put,
    Merge,
    Push,
    Cancel,
    Stats,
    Query,
    Ping,
    OnDisconnect,
    /// Inbound-only: a data snapshot notification at a path (spec §4.4:
    /// "Inbound data notifications are actions `d` ... and `m`"). The server
    /// never expects this tag on an outbound request, so `as_wire` is only
    /// exercised for it by the notify encoder used in tests.
    Data,
}

impl Action {
    fn as_wire(self) -> &'static str {
        match self {
            Action::Listen => "l",
            Action::Unlisten => "u",
            Action::Put => "p",
            Action::Merge => "m",
            Action::Push => "n",
            Action::Cancel => "c",
            Action::Stats => "s",
            Action::Query => "q",
            Action::Ping => "g",
            Action::OnDisconnect => "o",
            Action::Data => "d",
        }
    }

    fn from_wire(s: &str) -> Option<Self> {
        Some(match s {
            "l" => Action::Listen,
            "u" => Action::Unlisten,
            "p" => Action::Put,
            "m" => Action::Merge,
            "n" => Action::Push,
            "c" => Action::Cancel,
            "s" => Action::Stats,
            "q" => Action::Query,
            "g" => Action::Ping,
            "o" => Action::OnDisconnect,
            "d" => Action::Data,
            _ => return None,
        })
    }
}

/// The status field of an inbound data response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    Error(String),
}

/// A fully decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// Outbound request body, also used to round-trip a request we just sent.
    Request {
        r: u64,
        action: Action,
        path: Path,
        data: Option<Json>,
    },
    /// Inbound response correlated to a previously-sent request.
    Response {
        r: u64,
        status: ResponseStatus,
        data: Option<Json>,
    },
    /// Inbound push notification (server-initiated data/merge at a path).
    Notify {
        action: Action,
        path: Path,
        data: Json,
    },
    Control(ControlMsg),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMsg {
    Handshake {
        server_time_ms: i64,
        host: String,
        session: String,
    },
    Redirect {
        host: String,
    },
    Shutdown {
        reason: String,
    },
    Reset,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    t: String,
    d: Json,
}

#[derive(Serialize)]
struct WireRequestBody<'a> {
    p: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    d: Option<&'a Json>,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    r: u64,
    a: &'static str,
    b: WireRequestBody<'a>,
}

#[derive(Serialize)]
struct WireControl<'a> {
    t: &'static str,
    d: &'a Json,
}

/// Encodes a message into the JSON text sent on the wire.
pub fn encode(msg: &Msg) -> Result<String, WebcomError> {
    let value = match msg {
        Msg::Request {
            r,
            action,
            path,
            data,
        } => serde_json::to_value(WireRequest {
            r: *r,
            a: action.as_wire(),
            b: WireRequestBody {
                p: &path.to_string(),
                d: data.as_ref(),
            },
        })?,
        Msg::Response { r, status, data } => {
            let (s, d) = match status {
                ResponseStatus::Ok => ("ok".to_string(), data.clone()),
                ResponseStatus::Error(e) => (e.clone(), data.clone()),
            };
            serde_json::json!({"r": r, "b": {"s": s, "d": d}})
        }
        Msg::Notify { action, path, data } => {
            serde_json::json!({"a": action.as_wire(), "b": {"p": path.to_string(), "d": data}})
        }
        Msg::Control(ctrl) => {
            return encode_control(ctrl);
        }
    };
    let envelope = Envelope {
        t: "d".to_string(),
        d: value,
    };
    Ok(serde_json::to_string(&envelope)?)
}

fn encode_control(ctrl: &ControlMsg) -> Result<String, WebcomError> {
    let (tag, body) = match ctrl {
        ControlMsg::Handshake {
            server_time_ms,
            host,
            session,
        } => (
            "h",
            serde_json::json!({"ts": server_time_ms, "h": host, "s": session}),
        ),
        ControlMsg::Redirect { host } => ("r", serde_json::json!({"host": host})),
        ControlMsg::Shutdown { reason } => ("s", serde_json::json!({"reason": reason})),
        ControlMsg::Reset => ("o", serde_json::json!({})),
    };
    let inner = WireControl { t: tag, d: &body };
    let envelope = Envelope {
        t: "c".to_string(),
        d: serde_json::to_value(inner)?,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decodes wire text into a `Msg`, or a `WebcomError::Protocol` describing
/// why the frame was rejected.
pub fn decode(text: &str) -> Result<Msg, WebcomError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| WebcomError::Protocol(e.to_string()))?;
    match envelope.t.as_str() {
        "d" => decode_data(envelope.d),
        "c" => decode_control(envelope.d).map(Msg::Control),
        other => Err(WebcomError::Protocol(format!("unknown envelope type {other:?}"))),
    }
}

fn decode_data(d: Json) -> Result<Msg, WebcomError> {
    let obj = d
        .as_object()
        .ok_or_else(|| WebcomError::Protocol("data envelope is not an object".into()))?;

    let r = obj.get("r").and_then(Json::as_u64);
    let a = obj.get("a").and_then(Json::as_str);
    let b = obj.get("b").cloned().unwrap_or(Json::Null);

    match (r, a) {
        (Some(r), Some(a)) => {
            // Outbound request shape, also accepted on decode so a codec
            // round-trip test can feed its own output back in.
            let action = Action::from_wire(a)
                .ok_or_else(|| WebcomError::Protocol(format!("unknown action {a:?}")))?;
            let path_str = b.get("p").and_then(Json::as_str).unwrap_or("/");
            let path = Path::parse(path_str)?;
            let data = b.get("d").cloned();
            Ok(Msg::Request {
                r,
                action,
                path,
                data,
            })
        }
        (Some(r), None) => {
            let status = match b.get("s").and_then(Json::as_str) {
                Some("ok") => ResponseStatus::Ok,
                Some(other) => ResponseStatus::Error(other.to_string()),
                None => {
                    return Err(WebcomError::Protocol("response missing status".into()));
                }
            };
            let data = b.get("d").cloned();
            Ok(Msg::Response { r, status, data })
        }
        (None, Some(a)) => {
            let action = Action::from_wire(a)
                .ok_or_else(|| WebcomError::Protocol(format!("unknown action {a:?}")))?;
            let path_str = b.get("p").and_then(Json::as_str).unwrap_or("/");
            let path = Path::parse(path_str)?;
            let data = b.get("d").cloned().unwrap_or(Json::Null);
            Ok(Msg::Notify { action, path, data })
        }
        (None, None) => Err(WebcomError::Protocol(
            "data envelope has neither request id nor action".into(),
        )),
    }
}

fn decode_control(d: Json) -> Result<ControlMsg, WebcomError> {
    let obj = d
        .as_object()
        .ok_or_else(|| WebcomError::Protocol("control envelope is not an object".into()))?;
    let tag = obj
        .get("t")
        .and_then(Json::as_str)
        .ok_or_else(|| WebcomError::Protocol("control envelope missing tag".into()))?;
    let body = obj.get("d").cloned().unwrap_or(Json::Null);

    match tag {
        "h" => Ok(ControlMsg::Handshake {
            server_time_ms: body.get("ts").and_then(Json::as_i64).unwrap_or(0),
            host: body
                .get("h")
                .and_then(Json::as_str)
                .unwrap_or_default()
                .to_string(),
            session: body
                .get("s")
                .and_then(Json::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        "r" => Ok(ControlMsg::Redirect {
            host: body
                .get("host")
                .and_then(Json::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        "s" => Ok(ControlMsg::Shutdown {
            reason: body
                .get("reason")
                .and_then(Json::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        "o" => Ok(ControlMsg::Reset),
        other => Err(WebcomError::Protocol(format!("unknown control tag {other:?}"))),
    }
}
