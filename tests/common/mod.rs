use base64ct::{Base64, Encoding};
use bstr::ByteSlice;
use dkimsend::{
    crypto::SigningKey,
    transport::{Transport, TransportError},
};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::{
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, Mutex},
};
use tokio::{
    fs,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinHandle,
};

pub async fn read_signing_key(file_name: &str) -> io::Result<SigningKey> {
    let s = fs::read_to_string(file_name).await?;
    Ok(SigningKey::from_pkcs8_pem(&s).unwrap())
}

pub enum PublicKey {
    Rsa(RsaPublicKey),
    Ed25519(VerifyingKey),
}

pub async fn read_rsa_public_key(file_name: &str) -> io::Result<PublicKey> {
    let s = fs::read_to_string(file_name).await?;
    Ok(PublicKey::Rsa(RsaPublicKey::from_public_key_pem(&s).unwrap()))
}

pub async fn read_ed25519_public_key(file_name: &str) -> io::Result<PublicKey> {
    let s = fs::read_to_string(file_name).await?;
    Ok(PublicKey::Ed25519(VerifyingKey::from_public_key_pem(&s).unwrap()))
}

// A minimal DKIM verifier written independently of the library’s signer, so
// that signing bugs are not mirrored in the check.

#[derive(Debug, Eq, PartialEq)]
pub enum VerifyError {
    NoSignature,
    Malformed(&'static str),
    BodyHashMismatch,
    BadSignature,
}

/// Verifies the first *DKIM-Signature* header of a message in wire format.
pub fn verify(message: &[u8], key: &PublicKey) -> Result<(), VerifyError> {
    let (fields, body) = split_message(message);

    let (sig_name, sig_value) = fields
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(b"DKIM-Signature"))
        .ok_or(VerifyError::NoSignature)?;

    let tags = parse_tags(sig_value.to_str().map_err(|_| VerifyError::Malformed("utf-8"))?);
    let tag = |name: &str| {
        tags.iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .ok_or(VerifyError::Malformed("missing tag"))
    };

    if tag("v")? != "1" {
        return Err(VerifyError::Malformed("v="));
    }

    let (header_canon, body_canon) = match tag("c") {
        Ok(c) => match c.split_once('/') {
            Some((h, b)) => (h.to_owned(), b.to_owned()),
            None => (c.to_owned(), "simple".to_owned()),
        },
        Err(_) => ("simple".to_owned(), "simple".to_owned()),
    };
    let header_relaxed = header_canon == "relaxed";
    let body_relaxed = body_canon == "relaxed";

    // body hash

    let mut cbody = if body_relaxed {
        relaxed_body(body)
    } else {
        simple_body(body)
    };
    if let Ok(l) = tag("l") {
        let l: usize = l.parse().map_err(|_| VerifyError::Malformed("l="))?;
        if l > cbody.len() {
            return Err(VerifyError::Malformed("l= exceeds body"));
        }
        cbody.truncate(l);
    }

    let bh = Base64::decode_vec(tag("bh")?).map_err(|_| VerifyError::Malformed("bh="))?;
    if Sha256::digest(&cbody)[..] != bh[..] {
        return Err(VerifyError::BodyHashMismatch);
    }

    // header hash

    let mut used = vec![false; fields.len()];
    let mut input = vec![];
    for name in tag("h")?.split(':') {
        let found = fields
            .iter()
            .enumerate()
            .rev()
            .find(|(i, (n, _))| !used[*i] && n.eq_ignore_ascii_case(name.as_bytes()));
        if let Some((i, (n, v))) = found {
            used[i] = true;
            input.extend(canon_header(header_relaxed, n, v));
            input.extend(b"\r\n");
        }
    }
    let stripped = strip_b_tag(sig_value);
    input.extend(canon_header(header_relaxed, sig_name, &stripped));

    let hash = Sha256::digest(&input);

    let b = Base64::decode_vec(tag("b")?).map_err(|_| VerifyError::Malformed("b="))?;

    let ok = match (key, tag("a")?) {
        (PublicKey::Rsa(k), "rsa-sha256") => {
            k.verify(Pkcs1v15Sign::new::<Sha256>(), &hash, &b).is_ok()
        }
        (PublicKey::Ed25519(k), "ed25519-sha256") => {
            let sig = Signature::from_slice(&b).map_err(|_| VerifyError::Malformed("b="))?;
            k.verify(&hash, &sig).is_ok()
        }
        _ => return Err(VerifyError::Malformed("a=")),
    };

    if ok {
        Ok(())
    } else {
        Err(VerifyError::BadSignature)
    }
}

/// Returns the value of a tag of the first *DKIM-Signature* header, with
/// folding whitespace removed.
pub fn signature_tag(message: &[u8], name: &str) -> Option<String> {
    let (fields, _) = split_message(message);
    let (_, value) = fields
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(b"DKIM-Signature"))?;
    parse_tags(value.to_str().ok()?)
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v)
}

fn split_message(message: &[u8]) -> (Vec<(Vec<u8>, Vec<u8>)>, &[u8]) {
    let (header, body) = match message.find(b"\r\n\r\n") {
        Some(i) => (&message[..(i + 2)], &message[(i + 4)..]),
        None => (message, &b""[..]),
    };

    let mut fields: Vec<(Vec<u8>, Vec<u8>)> = vec![];
    for line in header.split_str("\r\n").filter(|l| !l.is_empty()) {
        if line.starts_with(b" ") || line.starts_with(b"\t") {
            let (_, value) = fields.last_mut().unwrap();
            value.extend(b"\r\n");
            value.extend(line);
        } else {
            let i = line.find_byte(b':').unwrap();
            fields.push((line[..i].to_vec(), line[(i + 1)..].to_vec()));
        }
    }

    (fields, body)
}

fn parse_tags(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .filter_map(|spec| {
            let (name, value) = spec.split_once('=')?;
            let value: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            Some((name.trim().to_owned(), value))
        })
        .collect()
}

// Removes the value of the b= tag, leaving everything else in place.
fn strip_b_tag(value: &[u8]) -> Vec<u8> {
    let mut result = vec![];
    for (i, spec) in value.split_str(";").enumerate() {
        if i > 0 {
            result.push(b';');
        }
        match spec.find_byte(b'=') {
            Some(j) if spec[..j].trim() == b"b" => result.extend(&spec[..=j]),
            _ => result.extend(spec),
        }
    }
    result
}

fn canon_header(relaxed: bool, name: &[u8], value: &[u8]) -> Vec<u8> {
    let mut result = vec![];
    if relaxed {
        result.extend(name.to_ascii_lowercase());
        result.push(b':');
        let unfolded = value.replace(b"\r\n", b"");
        result.extend(collapse_wsp(&unfolded).trim());
    } else {
        result.extend(name);
        result.push(b':');
        result.extend(value);
    }
    result
}

fn collapse_wsp(line: &[u8]) -> Vec<u8> {
    let mut result = vec![];
    let mut in_wsp = false;
    for &b in line {
        if b == b' ' || b == b'\t' {
            in_wsp = true;
        } else {
            if in_wsp {
                result.push(b' ');
                in_wsp = false;
            }
            result.push(b);
        }
    }
    if in_wsp {
        result.push(b' ');
    }
    result
}

fn simple_body(body: &[u8]) -> Vec<u8> {
    let mut body = body;
    while let Some(b) = body.strip_suffix(b"\r\n") {
        body = b;
    }
    let mut result = body.to_vec();
    result.extend(b"\r\n");
    result
}

fn relaxed_body(body: &[u8]) -> Vec<u8> {
    let body = body.strip_suffix(b"\r\n").unwrap_or(body);
    if body.is_empty() {
        return vec![];
    }

    let mut lines: Vec<Vec<u8>> = body
        .split_str("\r\n")
        .map(|line| {
            let mut line = collapse_wsp(line);
            if line.ends_with(b" ") {
                line.pop();
            }
            line
        })
        .collect();

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    let mut result = vec![];
    for line in lines {
        result.extend(line);
        result.extend(b"\r\n");
    }
    result
}

/// A message handed to a transport.
#[derive(Clone, Debug)]
pub struct CapturedMail {
    pub sender: String,
    pub recipients: Vec<String>,
    pub message: Vec<u8>,
}

/// A transport recording deliveries instead of sending them.
#[derive(Clone, Default)]
pub struct MockTransport {
    mails: Arc<Mutex<Vec<CapturedMail>>>,
    refuse: bool,
}

impl MockTransport {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    pub fn mails(&self) -> Vec<CapturedMail> {
        self.mails.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    type Delivery<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

    fn deliver<'a>(
        &'a self,
        sender: &'a str,
        recipients: &'a [String],
        message: &'a [u8],
    ) -> Self::Delivery<'a> {
        Box::pin(async move {
            if self.refuse {
                return Err(TransportError::Other("connection refused".into()));
            }

            self.mails.lock().unwrap().push(CapturedMail {
                sender: sender.into(),
                recipients: recipients.into(),
                message: message.into(),
            });

            Ok(())
        })
    }
}

/// A mail transaction received by the test SMTP server.
#[derive(Clone, Debug, Default)]
pub struct ReceivedMail {
    pub mail_from: String,
    pub rcpt_to: Vec<String>,
    pub data: Vec<u8>,
}

/// Starts an SMTP server on a local port that accepts one connection and
/// returns the mail received on it. The 8BITMIME extension is announced only
/// when `eight_bit_mime` is set.
pub async fn spawn_smtp_server(eight_bit_mime: bool) -> (SocketAddr, JoinHandle<ReceivedMail>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut mail = ReceivedMail::default();

        writer.write_all(b"220 localhost ESMTP test\r\n").await.unwrap();

        let mut line = vec![];
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).await.unwrap() == 0 {
                break;
            }

            let command = line.to_str().unwrap().trim_end().to_owned();
            let verb = command.get(..4).unwrap_or("").to_ascii_uppercase();

            match verb.as_str() {
                "EHLO" => {
                    let reply: &[u8] = if eight_bit_mime {
                        b"250-localhost\r\n250 8BITMIME\r\n"
                    } else {
                        b"250 localhost\r\n"
                    };
                    writer.write_all(reply).await.unwrap();
                }
                "MAIL" => {
                    mail.mail_from = command;
                    writer.write_all(b"250 OK\r\n").await.unwrap();
                }
                "RCPT" => {
                    mail.rcpt_to.push(command);
                    writer.write_all(b"250 OK\r\n").await.unwrap();
                }
                "DATA" => {
                    writer.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await.unwrap();
                    loop {
                        line.clear();
                        let n = reader.read_until(b'\n', &mut line).await.unwrap();
                        if n == 0 || line == b".\r\n" {
                            break;
                        }
                        let unstuffed = line.strip_prefix(b".").unwrap_or(&line);
                        mail.data.extend(unstuffed);
                    }
                    writer.write_all(b"250 OK queued\r\n").await.unwrap();
                }
                "QUIT" => {
                    writer.write_all(b"221 Bye\r\n").await.unwrap();
                    break;
                }
                _ => {
                    writer.write_all(b"250 OK\r\n").await.unwrap();
                }
            }
        }

        mail
    });

    (addr, handle)
}
