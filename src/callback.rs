/// System browser capture with a loopback redirect listener
use crate::error::{FlowError, Result};
use crate::provider::{CallbackParams, CodeCaptor};
use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;
use url::{Host, Url};

type Opener = Box<dyn FnMut(&Url) -> std::io::Result<()> + Send>;

/// Opens the authorization URL in the system browser and waits for the
/// redirect on the configured loopback address
pub struct BrowserCaptor {
    timeout: Duration,
    opener: Opener,
}

impl BrowserCaptor {
    pub fn new(timeout: Duration) -> Self {
        Self::with_opener(timeout, |url| webbrowser::open(url.as_str()))
    }

    /// Use a custom way of showing the authorization URL to the user
    pub fn with_opener<F>(timeout: Duration, opener: F) -> Self
    where
        F: FnMut(&Url) -> std::io::Result<()> + Send + 'static,
    {
        Self {
            timeout,
            opener: Box::new(opener),
        }
    }
}

impl CodeCaptor for BrowserCaptor {
    fn capture(&mut self, authorization_url: &Url, redirect_url: &Url) -> Result<CallbackParams> {
        let addr = loopback_addr(redirect_url)?;
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;

        (self.opener)(authorization_url)?;
        debug!(%addr, "waiting for authorization redirect");

        // Each connection gets its own thread so an idle preconnect cannot
        // hold back the redirect
        let (tx, rx) = mpsc::channel();
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Ok(params) = rx.try_recv() {
                return Ok(params);
            }

            match listener.accept() {
                Ok((stream, peer)) => {
                    let tx = tx.clone();
                    let path = redirect_url.path().to_string();
                    let spawned = thread::Builder::new()
                        .name("codeflow-redirect".to_string())
                        .spawn(move || match handle_request(stream, &path) {
                            Ok(Some(params)) => {
                                let _ = tx.send(params);
                            }
                            Ok(None) => {}
                            Err(e) => debug!(%peer, error = %e, "ignoring failed redirect connection"),
                        });
                    if let Err(e) = spawned {
                        debug!(%peer, error = %e, "could not serve redirect connection");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(FlowError::CaptureTimeout);
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Socket address to listen on for a loopback `http` redirect URL
pub(crate) fn loopback_addr(redirect_url: &Url) -> Result<SocketAddr> {
    if redirect_url.scheme() != "http" {
        return Err(FlowError::UnsupportedRedirect(format!(
            "{} (browser capture needs an http:// loopback redirect)",
            redirect_url
        )));
    }

    let ip = match redirect_url.host() {
        Some(Host::Domain(domain)) if domain.eq_ignore_ascii_case("localhost") => {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
        Some(Host::Ipv4(ip)) if ip.is_loopback() => IpAddr::V4(ip),
        Some(Host::Ipv6(ip)) if ip == Ipv6Addr::LOCALHOST => IpAddr::V6(ip),
        _ => {
            return Err(FlowError::UnsupportedRedirect(format!(
                "{} (host is not a loopback address)",
                redirect_url
            )))
        }
    };

    let port = redirect_url.port_or_known_default().unwrap_or(80);
    Ok(SocketAddr::new(ip, port))
}

fn handle_request(stream: TcpStream, redirect_path: &str) -> Result<Option<CallbackParams>> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    // Consume the headers so closing the socket does not reset the connection
    let mut header = String::new();
    while reader.read_line(&mut header)? > 2 {
        header.clear();
    }

    // GET /callback?code=...&state=... HTTP/1.1
    let Some(target) = request_line.split_whitespace().nth(1) else {
        respond(stream, "400 Bad Request", "Malformed request.")?;
        return Ok(None);
    };

    let Ok(url) = Url::parse("http://localhost").and_then(|base| base.join(target)) else {
        respond(stream, "400 Bad Request", "Malformed request.")?;
        return Ok(None);
    };

    if url.path() != redirect_path {
        // Browsers also ask for /favicon.ico and the like
        respond(stream, "404 Not Found", "Not found.")?;
        return Ok(None);
    }

    let params: CallbackParams = url.query_pairs().into_owned().collect();
    match params.get("error") {
        Some(error) => respond(
            stream,
            "200 OK",
            &format!("Authorization failed ({}). You can close this window.", escape(error)),
        )?,
        None => respond(
            stream,
            "200 OK",
            "Authorization complete. You can close this window and return to the application.",
        )?,
    }

    Ok(Some(params))
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn respond(mut stream: TcpStream, status: &str, message: &str) -> Result<()> {
    let html = format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Authorization</title></head>\
         <body style=\"font-family: sans-serif; text-align: center; margin-top: 4rem\">\
         <p>{}</p></body></html>",
        message
    );

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        html.len(),
        html
    );

    stream.write_all(response.as_bytes())?;
    stream.flush()?;
    Ok(())
}
