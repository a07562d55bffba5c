//! Runtime tuning endpoints.
//!
//! `GET` reads the current value as plain text, `POST` with a body sets it.
//! A rejected value leaves the configuration untouched and the connection
//! open.

use crate::config::{ConfigError, ConnectionLimit, FrameRate, Quality, Resolution};
use crate::http::{HttpRequest, Method};
use crate::response::{text_response, ErrorPage, Response};
use crate::state::StreamState;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Fps,
    Quality,
    Connections,
    Resolution,
}

impl Control {
    pub fn from_route(route: &str) -> Option<Self> {
        match route {
            "/fps" => Some(Control::Fps),
            "/quality" => Some(Control::Quality),
            "/connections" => Some(Control::Connections),
            "/resolution" => Some(Control::Resolution),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("method {0} not allowed on control endpoints")]
    Method(Method),
    #[error(transparent)]
    Value(#[from] ConfigError),
}

fn read(state: &StreamState, control: Control) -> String {
    let config = state.config();
    match control {
        Control::Fps => config.target_fps.to_string(),
        Control::Quality => config.quality.to_string(),
        Control::Connections => state.connections().to_string(),
        Control::Resolution => state.last_frame_size().to_string(),
    }
}

fn apply(state: &StreamState, control: Control, value: &str) -> Result<(), ControlError> {
    match control {
        Control::Fps => {
            let fps: FrameRate = value.parse()?;
            state.update_config(|config| config.target_fps = fps);
        }
        Control::Quality => {
            let quality: Quality = value.parse()?;
            state.update_config(|config| config.quality = quality);
        }
        Control::Connections => {
            let limit: ConnectionLimit = value.parse()?;
            state.update_config(|config| config.max_connections = limit);
        }
        Control::Resolution => {
            let resolution: Resolution = value.parse()?;
            state.update_config(|config| config.resolution = resolution);
        }
    }
    info!("Set {control:?} to {value}");
    Ok(())
}

fn dispatch(
    state: &StreamState,
    control: Control,
    request: &HttpRequest,
) -> Result<Response, ControlError> {
    match &request.method {
        Method::Get => Ok(text_response(read(state, control))),
        Method::Post => {
            apply(state, control, &request.body_text())?;
            Ok(Response::ok())
        }
        other => Err(ControlError::Method(other.clone())),
    }
}

/// Serve one control request.
pub fn handle_control(state: &StreamState, control: Control, request: &HttpRequest) -> Response {
    dispatch(state, control, request).unwrap_or_else(|e| {
        debug!("Rejected {} {}: {e}", request.method, request.path);
        ErrorPage::BadRequest.response(state.name())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerSettings;
    use frame_source::{FrameSize, TestPatternSource};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn state() -> Arc<StreamState> {
        let source = TestPatternSource::new(FrameSize::from_width_height(32, 24));
        StreamState::new(&ServerSettings::default(), Box::new(source))
    }

    fn request(method: Method, path: &str, body: &str) -> HttpRequest {
        HttpRequest {
            method,
            path: path.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: HashMap::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    fn get(state: &StreamState, control: Control) -> String {
        let response = handle_control(state, control, &request(Method::Get, "/", ""));
        assert_eq!(response.status(), "200 OK");
        String::from_utf8(response.body_bytes().to_vec()).unwrap()
    }

    fn post(state: &StreamState, control: Control, body: &str) -> Response {
        handle_control(state, control, &request(Method::Post, "/", body))
    }

    #[test]
    fn test_routes() {
        assert_eq!(Control::from_route("/fps"), Some(Control::Fps));
        assert_eq!(Control::from_route("/resolution"), Some(Control::Resolution));
        assert_eq!(Control::from_route("/fps/"), None);
    }

    #[test]
    fn test_quality_echo() {
        let state = state();
        for value in ["-1", "0", "50", "100"] {
            assert_eq!(post(&state, Control::Quality, value).status(), "200 OK");
            assert_eq!(get(&state, Control::Quality), value);
        }
    }

    #[test]
    fn test_invalid_value_left_unchanged() {
        let state = state();
        post(&state, Control::Quality, "40");
        for bad in ["abc", "101", "", "-5"] {
            let response = post(&state, Control::Quality, bad);
            assert!(response.status().starts_with("500"));
            assert!(!response.closes());
            let body = String::from_utf8(response.body_bytes().to_vec()).unwrap();
            assert!(body.contains("Bad request"));
        }
        assert_eq!(get(&state, Control::Quality), "40");
    }

    #[test]
    fn test_fps_and_connections() {
        let state = state();
        assert_eq!(get(&state, Control::Fps), "-1");
        post(&state, Control::Fps, "15");
        assert_eq!(get(&state, Control::Fps), "15");
        assert!(post(&state, Control::Fps, "0").status().starts_with("500"));

        assert_eq!(get(&state, Control::Connections), "0");
        post(&state, Control::Connections, "2");
        assert_eq!(state.config().max_connections, ConnectionLimit::Max(2));
        let _slot = state.try_acquire_slot().unwrap();
        assert_eq!(get(&state, Control::Connections), "1");
    }

    #[test]
    fn test_resolution_reports_last_frame() {
        let state = state();
        assert_eq!(get(&state, Control::Resolution), "0x0");
        post(&state, Control::Resolution, "16x12");
        let encoded = state.capture_and_encode().unwrap();
        state.publish(encoded);
        assert_eq!(get(&state, Control::Resolution), "16x12");
        assert!(post(&state, Control::Resolution, "16").status().starts_with("500"));
    }

    #[test]
    fn test_oversized_resolution_rejected() {
        let state = state();
        assert_eq!(post(&state, Control::Resolution, "320x240").status(), "200 OK");

        let response = post(&state, Control::Resolution, "65535x65535");
        assert!(response.status().starts_with("500"));
        assert!(!response.closes());
        assert_eq!(
            state.config().resolution,
            Resolution::Scaled(FrameSize::from_width_height(320, 240))
        );
    }

    #[test]
    fn test_get_is_idempotent() {
        let state = state();
        post(&state, Control::Fps, "12");
        let first = get(&state, Control::Fps);
        let second = get(&state, Control::Fps);
        assert_eq!(first, second);
    }

    #[test]
    fn test_other_method_rejected() {
        let state = state();
        let response = handle_control(
            &state,
            Control::Fps,
            &request(Method::Other("DELETE".to_string()), "/fps", ""),
        );
        assert!(response.status().starts_with("500"));
    }
}
