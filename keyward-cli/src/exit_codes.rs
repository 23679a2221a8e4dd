//! Exit codes following sysexits.h conventions.

/// Successful execution.
pub const SUCCESS: u8 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: u8 = 1;

/// Data format error: malformed blob or key, signature mismatch.
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: u8 = 65;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: u8 = 66;

/// I/O error (cannot write output file).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: u8 = 74;

/// Exit code with the message reported on stderr.
pub struct ExitCode {
    pub code: u8,
    pub message: Option<String>,
}

impl ExitCode {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        let code = if err
            .chain()
            .any(|cause| cause.downcast_ref::<keyward_core::KeywardError>().is_some())
            || message.contains("Invalid")
            || message.contains("does not verify")
        {
            DATA_ERROR
        } else if message.contains("Failed to read") {
            INPUT_ERROR
        } else if message.contains("Failed to write") || message.contains("already exists") {
            IO_ERROR
        } else {
            GENERAL_ERROR
        };

        Self {
            code,
            message: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_core_errors_are_data_errors() {
        let err = anyhow::Error::new(keyward_core::KeywardError::Encoding("bad".into()))
            .context("Decoding blob");
        assert_eq!(ExitCode::from_anyhow(&err).code, DATA_ERROR);
    }

    #[test]
    fn test_read_failures_are_input_errors() {
        let err = std::fs::read("/definitely/not/here")
            .context("Failed to read key file")
            .unwrap_err();
        assert_eq!(ExitCode::from_anyhow(&err).code, INPUT_ERROR);
    }

    #[test]
    fn test_unclassified_is_general() {
        assert_eq!(ExitCode::from_anyhow(&anyhow::anyhow!("boom")).code, GENERAL_ERROR);
    }
}
