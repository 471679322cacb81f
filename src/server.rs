//! TLS request/response server: one worker per accepted connection,
//! dispatching the fixed request catalog (see `SPEC_FULL.md` §4.9) over a
//! length-prefixed JSON protocol. The per-connection write half is shared
//! (behind a lock) between the dispatch loop and that connection's bbox
//! pusher so that ordinary responses and pushes never interleave bytes.

use std::io::BufReader;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::{rustls, TlsAcceptor};
use tracing::{info, warn};

use crate::bbox::{spawn_pusher, BboxBuffer, PusherHandle};
use crate::camera::CameraClient;
use crate::codec::{decode_length, encode_frame};
use crate::config::{BboxConfig, ServerConfig};
use crate::error::{NvrError, Result};
use crate::metadata::MetadataParser;
use crate::otp::{self, OtpManager};
use crate::secrets::{self, hash_password, verify_password};
use crate::storage::accounts::Account;
use crate::storage::lines::{BaseLine, CrossLine, CrossLineMode, VerticalLineEquation};
use crate::storage::Store;

/// Process-wide resources handed to every connection worker.
pub struct Shared {
    pub store: Arc<Store>,
    pub camera: Arc<CameraClient>,
    pub otp: Arc<OtpManager>,
    pub buffer: Arc<BboxBuffer>,
    pub parser: Arc<MetadataParser>,
    pub bbox_cfg: BboxConfig,
}

/// Start the listener, load the TLS context once, and accept connections
/// until the process is torn down. Each accepted socket gets its own
/// tokio task; a handshake or framing error only affects that connection.
pub async fn run(shared: Arc<Shared>, cfg: &ServerConfig) -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let tls_config = load_tls_config(&cfg.cert_path, &cfg.key_path)?;
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));

    let listener = TcpListener::bind(("0.0.0.0", cfg.port))
        .await
        .map_err(|e| NvrError::Io(e))?;
    info!(port = cfg.port, "TLS request server listening");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            match acceptor.accept(socket).await {
                Ok(tls_stream) => {
                    info!(%peer, "client connected");
                    handle_connection(tls_stream, shared).await;
                    info!(%peer, "client disconnected");
                }
                Err(e) => warn!(%peer, error = %e, "TLS handshake failed"),
            }
        });
    }
}

fn load_tls_config(cert_path: &str, key_path: &str) -> Result<rustls::ServerConfig> {
    let cert_file = std::fs::File::open(cert_path)
        .map_err(|e| NvrError::Tls(format!("cannot open certificate {cert_path}: {e}")))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| NvrError::Tls(format!("malformed certificate: {e}")))?;

    let key_file = std::fs::File::open(key_path)
        .map_err(|e| NvrError::Tls(format!("cannot open private key {key_path}: {e}")))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| NvrError::Tls(format!("malformed private key: {e}")))?
        .ok_or_else(|| NvrError::Tls("no private key found in file".into()))?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| NvrError::Tls(format!("invalid certificate/key pair: {e}")))
}

/// Tagged request envelope: `request_id` plus a loosely-typed `data`
/// object. Individual fields are pulled out per handler rather than
/// modeled as one exhaustive struct, since each request id has its own
/// shape and unrecognized ids must not fail to deserialize.
#[derive(serde::Deserialize)]
struct Envelope {
    request_id: i64,
    #[serde(default)]
    data: Value,
    #[serde(default = "default_camera_type")]
    camera_type: String,
}

fn default_camera_type() -> String {
    "CCTV".to_string()
}

async fn handle_connection<S>(stream: S, shared: Arc<Shared>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = tokio::io::BufReader::new(read_half);
    let write_half = Arc::new(tokio::sync::Mutex::new(write_half));

    let mut pusher: Option<(tokio::task::JoinHandle<()>, PusherHandle)> = None;

    loop {
        let payload = match read_frame(&mut reader).await {
            Ok(Some(p)) => p,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "framing error, closing connection");
                break;
            }
        };

        let envelope: Envelope = match serde_json::from_slice(&payload) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "invalid JSON request, closing connection");
                break;
            }
        };

        match dispatch(&envelope, &shared, &write_half, &mut pusher).await {
            Ok(Some(response)) => {
                if write_frame(&write_half, &response).await.is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, request_id = envelope.request_id, "handler error"),
        }
    }

    if let Some((handle, push_handle)) = pusher.take() {
        push_handle.stop();
        let _ = handle.await;
    }
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(NvrError::Framing(e.to_string())),
    }
    let len = decode_length(len_buf)?;
    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| NvrError::Framing(e.to_string()))?;
    Ok(Some(payload))
}

async fn write_frame<W: AsyncWrite + Unpin>(
    write_half: &Arc<tokio::sync::Mutex<W>>,
    value: &Value,
) -> Result<()> {
    let json = serde_json::to_vec(value).map_err(|e| NvrError::Internal(e.to_string()))?;
    let frame = encode_frame(&json);
    let mut guard = write_half.lock().await;
    guard.write_all(&frame).await.map_err(|e| NvrError::Framing(e.to_string()))?;
    guard.flush().await.map_err(|e| NvrError::Framing(e.to_string()))
}

async fn dispatch<W>(
    envelope: &Envelope,
    shared: &Arc<Shared>,
    write_half: &Arc<tokio::sync::Mutex<W>>,
    pusher: &mut Option<(tokio::task::JoinHandle<()>, PusherHandle)>,
) -> Result<Option<Value>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    match envelope.request_id {
        1 => handle_select_detections(&envelope.data, shared),
        2 => handle_insert_line(&envelope.data, &envelope.camera_type, shared).await,
        3 => handle_reconcile_lines(shared).await,
        4 => handle_teardown(shared).await,
        5 => handle_insert_baseline(&envelope.data, shared),
        6 => handle_insert_vertical_equation(&envelope.data, shared),
        7 => handle_select_baselines(shared),
        8 => handle_login_step1(&envelope.data, shared),
        22 => handle_login_step2(&envelope.data, shared),
        9 => handle_signup(&envelope.data, shared),
        31 => {
            handle_start_pusher(shared, write_half, pusher).await;
            Ok(None)
        }
        32 => {
            handle_stop_pusher(shared, pusher).await;
            Ok(None)
        }
        other => {
            warn!(request_id = other, "unrecognized request id, ignoring");
            Ok(None)
        }
    }
}

fn str_field(data: &Value, key: &str) -> String {
    data.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn i64_field(data: &Value, key: &str) -> i64 {
    data.get(key).and_then(Value::as_i64).unwrap_or(-1)
}

fn f64_field(data: &Value, key: &str) -> f64 {
    data.get(key).and_then(Value::as_f64).unwrap_or(-1.0)
}

fn bool_field(data: &Value, key: &str, default: bool) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(default)
}

// ───────────────────────── request 1: detections ───────────────────────

fn handle_select_detections(data: &Value, shared: &Arc<Shared>) -> Result<Option<Value>> {
    let start = parse_timestamp(&str_field(data, "start_timestamp"));
    let end = parse_timestamp(&str_field(data, "end_timestamp"));

    let detections = match (start, end) {
        (Some(start), Some(end)) => shared.store.select_detections_between(start, end).unwrap_or_default(),
        _ => Vec::new(),
    };

    let data_array: Vec<Value> = detections
        .into_iter()
        .map(|d| {
            json!({
                "image": crate::codec::base64_encode(&d.image),
                "timestamp": d.captured_at.to_rfc3339(),
            })
        })
        .collect();

    Ok(Some(json!({ "request_id": 10, "data": data_array })))
}

fn parse_timestamp(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .ok()
}

// ───────────────────────── request 2: insert line ───────────────────────

async fn handle_insert_line(data: &Value, camera_type: &str, shared: &Arc<Shared>) -> Result<Option<Value>> {
    let index = i64_field(data, "index");
    let x1 = i64_field(data, "x1");
    let y1 = i64_field(data, "y1");
    let x2 = i64_field(data, "x2");
    let y2 = i64_field(data, "y2");
    let name = {
        let n = str_field(data, "name");
        if n.is_empty() { "name1".to_string() } else { n }
    };
    let mode = {
        let m = str_field(data, "mode");
        CrossLineMode::from_str(if m.is_empty() { "BothDirections" } else { &m })
    };

    let line = CrossLine { index, x1, y1, x2, y2, name, mode };
    let mapping_success = shared.store.insert_line(&line).is_ok();

    if camera_type == "CCTV" {
        // The camera PUT is fired unconditionally (its own failure is
        // logged, not reflected in `mapping_success`, matching the source:
        // `mapping_success` tracks the local insert, not the HTTP call).
        if let Err(e) = shared.camera.put_lines(&line).await {
            warn!(error = %e, index, "camera line PUT failed");
        }
        Ok(Some(json!({ "request_id": 11, "mapping_success": mapping_success as i64 })))
    } else {
        let lines = shared.store.select_all_lines().unwrap_or_default();
        Ok(Some(json!({ "request_id": 18, "data": lines.iter().map(line_to_json).collect::<Vec<_>>() })))
    }
}

fn line_to_json(line: &CrossLine) -> Value {
    json!({
        "index": line.index,
        "x1": line.x1,
        "y1": line.y1,
        "x2": line.x2,
        "y2": line.y2,
        "name": line.name,
        "mode": line.mode.as_str(),
    })
}

// ───────────────────────── request 3: reconcile ────────────────────────

async fn handle_reconcile_lines(shared: &Arc<Shared>) -> Result<Option<Value>> {
    let camera_indices = match shared.camera.get_lines().await {
        Ok(resp) => camera_line_indices(&resp.body),
        Err(e) => {
            warn!(error = %e, "camera line fetch failed during reconciliation");
            Vec::new()
        }
    };

    let db_lines = shared.store.select_all_lines().unwrap_or_default();
    let keep: Vec<CrossLine> = db_lines.into_iter().filter(|l| camera_indices.contains(&l.index)).collect();

    let _ = shared.store.replace_all_lines(&keep);

    Ok(Some(json!({ "request_id": 12, "data": keep.iter().map(line_to_json).collect::<Vec<_>>() })))
}

fn camera_line_indices(body: &Value) -> Vec<i64> {
    body.get("lineCrossing")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|first| first.get("line"))
        .and_then(Value::as_array)
        .map(|lines| lines.iter().filter_map(|l| l.get("index").and_then(Value::as_i64)).collect())
        .unwrap_or_default()
}

// ───────────────────────── request 4: full teardown ─────────────────────

async fn handle_teardown(shared: &Arc<Shared>) -> Result<Option<Value>> {
    let camera_indices = match shared.camera.get_lines().await {
        Ok(resp) => camera_line_indices(&resp.body),
        Err(e) => {
            warn!(error = %e, "camera line fetch failed during teardown");
            Vec::new()
        }
    };
    for index in camera_indices {
        if let Err(e) = shared.camera.delete_line(index).await {
            warn!(error = %e, index, "camera line delete failed during teardown");
        }
    }

    let delete_success = shared.store.delete_all_lines().is_ok()
        && shared.store.delete_all_baselines().is_ok()
        && shared.store.delete_all_vertical_equations().is_ok();

    Ok(Some(json!({ "request_id": 13, "delete_success": delete_success as i64 })))
}

// ───────────────────────── request 5/6: baselines ───────────────────────

fn handle_insert_baseline(data: &Value, shared: &Arc<Shared>) -> Result<Option<Value>> {
    let index = i64_field(data, "index");
    let baseline = BaseLine {
        index,
        matrix_num1: i64_field(data, "matrixNum1"),
        matrix_num2: i64_field(data, "matrixNum2"),
        x1: i64_field(data, "x1"),
        y1: i64_field(data, "y1"),
        x2: i64_field(data, "x2"),
        y2: i64_field(data, "y2"),
    };

    let already_existed = shared.store.baseline_exists(index).unwrap_or(false);
    let insert_success = shared.store.insert_baseline(&baseline).is_ok();
    let update_success = if already_existed {
        shared.store.update_baseline_matrix_nums(index, baseline.matrix_num1, baseline.matrix_num2).is_ok()
    } else {
        false
    };

    Ok(Some(json!({
        "request_id": 14,
        "insert_success": insert_success as i64,
        "update_success": update_success as i64,
    })))
}

fn handle_insert_vertical_equation(data: &Value, shared: &Arc<Shared>) -> Result<Option<Value>> {
    let eq = VerticalLineEquation { index: i64_field(data, "index"), a: f64_field(data, "a"), b: f64_field(data, "b") };
    let insert_success = shared.store.insert_vertical_equation(&eq).is_ok();
    Ok(Some(json!({ "request_id": 14, "insert_success": insert_success as i64 })))
}

fn handle_select_baselines(shared: &Arc<Shared>) -> Result<Option<Value>> {
    let baselines = shared.store.select_all_baselines().unwrap_or_default();
    let data: Vec<Value> = baselines
        .iter()
        .map(|b| {
            json!({
                "index": b.index,
                "matrixNum1": b.matrix_num1,
                "x1": b.x1,
                "y1": b.y1,
                "matrixNum2": b.matrix_num2,
                "x2": b.x2,
                "y2": b.y2,
            })
        })
        .collect();
    Ok(Some(json!({ "request_id": 16, "data": data })))
}

// ───────────────────────── request 8/22: two-step auth ──────────────────

fn handle_login_step1(data: &Value, shared: &Arc<Shared>) -> Result<Option<Value>> {
    let id = str_field(data, "id");
    let mut passwd = str_field(data, "passwd");

    let account = shared.store.get_account_by_id(&id).ok();
    let step1_success = match &account {
        Some(acc) => verify_password(&acc.password_hash, &passwd),
        None => false,
    };

    if step1_success {
        if let Some(acc) = &account {
            if acc.use_otp && !acc.otp_secret.is_empty() {
                let _ = shared.otp.restore(&id, &acc.otp_secret);
            }
        }
    }
    secrets::secure_clear(&mut passwd);

    let mut response = json!({ "request_id": 19, "step1_success": step1_success as i64 });
    if step1_success {
        let acc = account.unwrap();
        response["requires_otp"] = json!(acc.use_otp as i64);
        response["message"] = json!(if acc.use_otp {
            "ID/PW 검증 완료. OTP 또는 복구 코드를 입력하세요."
        } else {
            "ID/PW 검증 완료. 바로 로그인 가능합니다."
        });
    }
    Ok(Some(response))
}

fn handle_login_step2(data: &Value, shared: &Arc<Shared>) -> Result<Option<Value>> {
    let id = str_field(data, "id");
    let mut input = str_field(data, "input");

    let is_totp_code = input.len() == 6 && input.chars().all(|c| c.is_ascii_digit());

    let (final_login_success, message) = if is_totp_code {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        if shared.otp.verify(&id, &input, now) {
            (true, "OTP 검증 성공. 로그인 완료.".to_string())
        } else {
            (false, "OTP 또는 복구 코드가 올바르지 않습니다.".to_string())
        }
    } else {
        let used = shared.store.mark_recovery_code_used(&id, &input).unwrap_or(false);
        if used {
            (true, "복구 코드로 로그인 성공. 해당 복구 코드는 무효화되었습니다.".to_string())
        } else {
            (false, "OTP 또는 복구 코드가 올바르지 않습니다.".to_string())
        }
    };
    secrets::secure_clear(&mut input);

    Ok(Some(json!({
        "request_id": 23,
        "final_login_success": final_login_success as i64,
        "message": message,
    })))
}

// ───────────────────────── request 9: signup ────────────────────────────

fn handle_signup(data: &Value, shared: &Arc<Shared>) -> Result<Option<Value>> {
    let id = str_field(data, "id");
    let mut passwd = str_field(data, "passwd");
    let use_otp = bool_field(data, "use_otp", true);

    let password_hash = match hash_password(&passwd) {
        Ok(h) => h,
        Err(e) => {
            secrets::secure_clear(&mut passwd);
            warn!(error = %e, "password hash failure during signup");
            return Ok(Some(json!({ "request_id": 20, "sign_up_success": 0 })));
        }
    };
    secrets::secure_clear(&mut passwd);

    let mut otp_uri = String::new();
    let mut otp_secret = String::new();
    let mut qr_code_svg = String::new();
    let mut recovery_codes: Vec<String> = Vec::new();

    if use_otp {
        if let Ok((uri, secret)) = shared.otp.enrol(&id) {
            otp_uri = uri;
            otp_secret = secret;
        }
        qr_code_svg = otp::render_qr_svg(&otp_uri).unwrap_or_default();
        recovery_codes = secrets::generate_recovery_codes();
    }

    let account = Account { id: id.clone(), password_hash, otp_secret: otp_secret.clone(), use_otp };
    let sign_up_success = shared.store.create_account(&account).is_ok();

    if sign_up_success && use_otp {
        let hashes: Vec<String> = recovery_codes.iter().filter_map(|c| hash_password(c).ok()).collect();
        let _ = shared.store.store_hashed_recovery_codes(&id, &hashes);
    }

    let mut response = json!({ "request_id": 20, "sign_up_success": sign_up_success as i64 });
    if sign_up_success && use_otp {
        response["qr_code_svg"] = json!(qr_code_svg);
        response["otp_uri"] = json!(otp_uri);
        response["recovery_codes"] = json!(recovery_codes);
    }

    for code in &mut recovery_codes {
        secrets::secure_clear(code);
    }

    Ok(Some(response))
}

// ───────────────────────── request 31/32: pusher control ────────────────

async fn handle_start_pusher<W>(
    shared: &Arc<Shared>,
    write_half: &Arc<tokio::sync::Mutex<W>>,
    pusher: &mut Option<(tokio::task::JoinHandle<()>, PusherHandle)>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    if let Err(e) = shared.parser.start().await {
        warn!(error = %e, "metadata parser failed to start");
    }
    if pusher.is_none() {
        let buffer_delay = Duration::from_millis(shared.bbox_cfg.buffer_delay_ms);
        let send_interval = Duration::from_millis(shared.bbox_cfg.send_interval_ms);
        *pusher = Some(spawn_pusher(shared.buffer.clone(), write_half.clone(), buffer_delay, send_interval));
    }
}

async fn handle_stop_pusher(
    shared: &Arc<Shared>,
    pusher: &mut Option<(tokio::task::JoinHandle<()>, PusherHandle)>,
) {
    if let Some((handle, push_handle)) = pusher.take() {
        push_handle.stop();
        let _ = handle.await;
    }
    shared.parser.stop().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraClient;
    use crate::config::CameraConfig;

    fn test_shared() -> Arc<Shared> {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let camera = Arc::new(CameraClient::new(CameraConfig::default()).unwrap());
        let buffer = Arc::new(BboxBuffer::new());
        Arc::new(Shared {
            store,
            camera,
            otp: Arc::new(OtpManager::new()),
            buffer: buffer.clone(),
            parser: Arc::new(MetadataParser::new(String::new(), buffer)),
            bbox_cfg: BboxConfig { buffer_delay_ms: 100, send_interval_ms: 10 },
        })
    }

    #[test]
    fn insert_line_then_select_round_trips_unscaled_coordinates() {
        let shared = test_shared();
        let data = json!({ "index": 1, "x1": 10, "y1": 20, "x2": 30, "y2": 40, "name": "L1", "mode": "Right" });
        let line = CrossLine { index: 1, x1: 10, y1: 20, x2: 30, y2: 40, name: "L1".into(), mode: CrossLineMode::from_str(&str_field(&data, "mode")) };
        shared.store.insert_line(&line).unwrap();
        let all = shared.store.select_all_lines().unwrap();
        assert_eq!(all[0].x1, 10);
        assert_eq!(all[0].mode, CrossLineMode::Right);
    }

    #[test]
    fn signup_without_otp_omits_otp_fields() {
        let shared = test_shared();
        let data = json!({ "id": "alice", "passwd": "pw12345", "use_otp": false });
        let response = handle_signup(&data, &shared).unwrap().unwrap();
        assert_eq!(response["sign_up_success"], 1);
        assert!(response.get("qr_code_svg").is_none());
        assert!(response.get("recovery_codes").is_none());
    }

    #[test]
    fn signup_with_otp_returns_five_recovery_codes() {
        let shared = test_shared();
        let data = json!({ "id": "bob", "passwd": "pw12345", "use_otp": true });
        let response = handle_signup(&data, &shared).unwrap().unwrap();
        assert_eq!(response["sign_up_success"], 1);
        assert_eq!(response["recovery_codes"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn login_step1_rejects_unknown_account_without_disclosing_why() {
        let shared = test_shared();
        let data = json!({ "id": "nobody", "passwd": "whatever" });
        let response = handle_login_step1(&data, &shared).unwrap().unwrap();
        assert_eq!(response["step1_success"], 0);
        assert!(response.get("requires_otp").is_none());
    }

    #[test]
    fn login_step1_then_step2_with_totp_succeeds() {
        let shared = test_shared();
        let signup = json!({ "id": "carol", "passwd": "pw12345", "use_otp": true });
        let signup_resp = handle_signup(&signup, &shared).unwrap().unwrap();
        let secret = {
            // Recover the stored secret for a locally-built verifier.
            shared.store.get_account_by_id("carol").unwrap().otp_secret
        };
        assert!(!secret.is_empty());
        let _ = signup_resp;

        let step1 = json!({ "id": "carol", "passwd": "pw12345" });
        let step1_resp = handle_login_step1(&step1, &shared).unwrap().unwrap();
        assert_eq!(step1_resp["step1_success"], 1);
        assert_eq!(step1_resp["requires_otp"], 1);
    }

    #[test]
    fn recovery_code_reused_fails_second_time() {
        let shared = test_shared();
        shared
            .store
            .create_account(&Account { id: "dave".into(), password_hash: "x".into(), otp_secret: String::new(), use_otp: true })
            .unwrap();
        let hash = hash_password("AB12CD34EF").unwrap();
        shared.store.store_hashed_recovery_codes("dave", &[hash]).unwrap();

        let step2 = json!({ "id": "dave", "input": "AB12CD34EF" });
        let first = handle_login_step2(&step2, &shared).unwrap().unwrap();
        assert_eq!(first["final_login_success"], 1);
        assert!(first["message"].as_str().unwrap().contains("무효화"));

        let second = handle_login_step2(&step2, &shared).unwrap().unwrap();
        assert_eq!(second["final_login_success"], 0);
    }

    #[test]
    fn unrecognized_request_id_produces_no_response() {
        let shared = test_shared();
        let envelope = Envelope { request_id: 999, data: Value::Null, camera_type: default_camera_type() };
        let rt = tokio::runtime::Runtime::new().unwrap();
        let write_half: Arc<tokio::sync::Mutex<tokio::io::DuplexStream>> = {
            let (_a, b) = tokio::io::duplex(16);
            Arc::new(tokio::sync::Mutex::new(b))
        };
        let mut pusher = None;
        let result = rt.block_on(dispatch(&envelope, &shared, &write_half, &mut pusher));
        assert!(result.unwrap().is_none());
    }
}
