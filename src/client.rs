// Copyright 2025 Qubership Monitoring Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! API failures as seen by the engine.
//!
//! Every trait that talks to the cluster (object store, discovery, pod exec)
//! reports this type so the not-found / forbidden / conflict taxonomy can be
//! inspected the same way regardless of the transport underneath.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("api server responded {code} {reason}: {message}"))]
    Status {
        code: u16,
        reason: String,
        message: String,
    },

    #[snafu(display("kubernetes client error: {source}"))]
    Transport { source: kube::Error },

    #[snafu(display("failed to encode request body: {source}"))]
    Encode { source: serde_json::Error },

    #[snafu(display("exec stream error: {source}"))]
    Stream { source: std::io::Error },

    #[snafu(display("command failed in pod {pod}: {message}"))]
    CommandFailed { pod: String, message: String },
}

impl ApiError {
    pub fn status(code: u16, reason: &str, message: impl Into<String>) -> Self {
        ApiError::Status {
            code,
            reason: reason.to_owned(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::status(404, "NotFound", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::status(403, "Forbidden", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::status(409, "Conflict", message)
    }

    fn code(&self) -> Option<u16> {
        match self {
            ApiError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(404)
    }

    pub fn is_forbidden(&self) -> bool {
        self.code() == Some(403)
    }

    pub fn is_conflict(&self) -> bool {
        self.code() == Some(409)
    }
}

impl From<kube::Error> for ApiError {
    fn from(source: kube::Error) -> Self {
        match source {
            kube::Error::Api(response) => ApiError::Status {
                code: response.code,
                reason: response.reason.clone(),
                message: response.message.clone(),
            },
            source => ApiError::Transport { source },
        }
    }
}
