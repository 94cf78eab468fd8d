use serde::{Deserialize, Serialize};

// Body of `POST /scan`
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub chart_url: String,
}

// Body returned with every non-2xx response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
