use std::process::Stdio;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use zeta_common::ZetaError;

/// Driver executed in a fresh interpreter per invocation. It loads the
/// handler module, calls `main_handler` with the request params (JSON on
/// stdin) and prints a single JSON envelope as its last stdout line, so
/// anything the handler itself prints does not corrupt the reply.
const DRIVER: &str = r#"
import importlib.util
import json
import sys

params = json.load(sys.stdin)
spec = importlib.util.spec_from_file_location("handler", sys.argv[1])
module = importlib.util.module_from_spec(spec)
try:
    spec.loader.exec_module(module)
except Exception as e:
    print(json.dumps({"ok": False, "missing": False, "error": str(e)}))
    sys.exit(0)
if not hasattr(module, "main_handler"):
    print(json.dumps({"ok": False, "missing": True, "error": "main_handler function not found in handler.py"}))
    sys.exit(0)
try:
    result = module.main_handler(params)
    print(json.dumps({"ok": True, "result": result}))
except Exception as e:
    print(json.dumps({"ok": False, "missing": False, "error": str(e)}))
"#;

#[derive(Debug, Deserialize)]
struct DriverReply {
    ok: bool,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    result: Option<Value>,
}

/// Run the user handler with the given params and return its value.
pub async fn run_handler(
    python_bin: &str,
    handler_path: &str,
    params: &Value,
) -> Result<Value, ZetaError> {
    let mut child = Command::new(python_bin)
        .arg("-c")
        .arg(DRIVER)
        .arg(handler_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ZetaError::Handler(format!("unable to start the handler runtime: {e}")))?;

    let params_bytes = serde_json::to_vec(params)
        .map_err(|e| ZetaError::Handler(format!("unable to encode params: {e}")))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(&params_bytes)
            .await
            .map_err(|e| ZetaError::Handler(format!("unable to pass params to the handler: {e}")))?;
        // close stdin so json.load sees EOF
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| ZetaError::Handler(format!("handler runtime failed: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ZetaError::Handler(format!(
            "handler runtime exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    decode_reply(&String::from_utf8_lossy(&output.stdout))
}

/// The envelope is the last non-empty stdout line.
fn decode_reply(stdout: &str) -> Result<Value, ZetaError> {
    let line = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| ZetaError::Handler("handler runtime produced no reply".to_string()))?;
    let reply: DriverReply = serde_json::from_str(line)
        .map_err(|e| ZetaError::Handler(format!("unreadable handler reply: {e}")))?;

    if reply.ok {
        return Ok(reply.result.unwrap_or(Value::Null));
    }
    let error = reply.error.unwrap_or_else(|| "unknown handler error".to_string());
    if reply.missing {
        Err(ZetaError::NotFound(error))
    } else {
        Err(ZetaError::Handler(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_success_reply() {
        let value = decode_reply("{\"ok\": true, \"result\": {\"a\": 1}}\n").unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_decode_skips_handler_prints() {
        let stdout = "debug line from the handler\nanother one\n{\"ok\": true, \"result\": 42}\n";
        assert_eq!(decode_reply(stdout).unwrap(), serde_json::json!(42));
    }

    #[test]
    fn test_decode_missing_handler_is_not_found() {
        let stdout =
            "{\"ok\": false, \"missing\": true, \"error\": \"main_handler function not found in handler.py\"}\n";
        let err = decode_reply(stdout).unwrap_err();
        assert!(matches!(err, ZetaError::NotFound(_)));
        assert!(err.to_string().contains("main_handler function not found"));
    }

    #[test]
    fn test_decode_handler_exception() {
        let stdout = "{\"ok\": false, \"missing\": false, \"error\": \"boom\"}\n";
        let err = decode_reply(stdout).unwrap_err();
        assert!(matches!(err, ZetaError::Handler(_)));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_decode_null_result() {
        assert_eq!(
            decode_reply("{\"ok\": true, \"result\": null}\n").unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_decode_empty_output_fails() {
        assert!(decode_reply("").is_err());
        assert!(decode_reply("\n\n").is_err());
    }
}
