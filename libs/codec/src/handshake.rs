use bridge_api::BridgeError;

const AUTH: &str = "AUTH ";
const OK: &str = "OK";
const DENIED: &str = "DENIED";

/// Connection handshake messages. Each one travels as a single frame
/// payload in ASCII:
///
/// - client → server: `AUTH <identity>`
/// - server → client: `OK` or `DENIED <reason>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Auth(String),
    Ok,
    Denied(String),
}

impl Handshake {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Handshake::Auth(identity) => format!("{AUTH}{identity}").into_bytes(),
            Handshake::Ok => OK.as_bytes().to_vec(),
            Handshake::Denied(reason) if reason.is_empty() => DENIED.as_bytes().to_vec(),
            Handshake::Denied(reason) => format!("{DENIED} {reason}").into_bytes(),
        }
    }

    pub fn parse(payload: &[u8]) -> Result<Self, BridgeError> {
        let text = std::str::from_utf8(payload)?;
        if let Some(identity) = text.strip_prefix(AUTH) {
            let identity = identity.trim();
            if identity.is_empty() {
                return Err(BridgeError::format_err("empty identity in AUTH"));
            }
            return Ok(Handshake::Auth(identity.to_string()));
        }
        if text == OK {
            return Ok(Handshake::Ok);
        }
        if let Some(rest) = text.strip_prefix(DENIED) {
            return Ok(Handshake::Denied(rest.trim().to_string()));
        }
        Err(BridgeError::format_err(format!("unexpected handshake message: {text:?}")))
    }
}
