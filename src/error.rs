use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssocError {
	#[error("Store not initialized: call store/initialize first")]
	NotInitialized,
	#[error("Store unavailable: {0}")]
	Unavailable(String),
	#[error("Maintenance failed: {0}")]
	MaintenanceFailed(String),
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Storage corruption: {0}")]
	Corruption(String),
}

impl AssocError {
	pub fn code(&self) -> &str {
		match self {
			Self::NotInitialized => "ASSOC_NOT_LOADED",
			Self::Unavailable(_) => "ASSOC_UNAVAILABLE",
			Self::MaintenanceFailed(_) => "ASSOC_MAINTENANCE_FAILED",
			Self::Io(_) => "ASSOC_IO",
			Self::Serialization(_) => "ASSOC_SERIALIZATION",
			Self::Corruption(_) => "ASSOC_CORRUPT",
		}
	}

	pub fn to_json_rpc_error(&self) -> serde_json::Value {
		serde_json::json!({
			"assocCode": self.code(),
			"message": self.to_string(),
		})
	}
}
