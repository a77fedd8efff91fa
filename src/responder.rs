//! 本機 http-01 挑戰回應伺服器。

use std::{
    collections::HashMap,
    net::{SocketAddr, TcpListener},
    sync::{mpsc, Arc, PoisonError, RwLock},
    thread::{self, JoinHandle},
};

use actix_web::{dev::ServerHandle, rt::System, web, App, HttpRequest, HttpResponse, HttpServer};
use log::{error, info, warn};

use crate::{
    challenge::HTTP01_PATH_PREFIX,
    solver::{ChallengeSolver, SolverError},
};

type Tokens = RwLock<HashMap<String, String>>;

/// 在獨立執行緒上執行的 http-01 回應伺服器。
///
/// 對 `GET /.well-known/acme-challenge/<token>` 回傳 200 與 key authorization，其他路徑回傳 404。
/// 同一個伺服器可同時服務多個網域的 token；drop 或 [`Http01Responder::stop`] 時關閉監聽。
pub struct Http01Responder {
    addr: SocketAddr,
    tokens: Arc<Tokens>,
    handle: ServerHandle,
    thread: Option<JoinHandle<()>>,
}

async fn serve_token(
    req: HttpRequest,
    token: web::Path<String>,
    tokens: web::Data<Tokens>,
) -> HttpResponse {
    let value = tokens
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(token.as_str())
        .cloned();

    match value {
        Some(key_auth) => HttpResponse::Ok().content_type("text/plain").body(key_auth),
        None => {
            warn!("unknown challenge token: {}", req.path());
            HttpResponse::NotFound().finish()
        }
    }
}

async fn not_found(req: HttpRequest) -> HttpResponse {
    warn!("unknown request path: {}", req.path());
    HttpResponse::NotFound().finish()
}

impl Http01Responder {
    /// 在 `addr`（例如 `0.0.0.0:80`）開始監聽。
    pub fn start(addr: &str) -> Result<Self, SolverError> {
        let listener = TcpListener::bind(addr).map_err(|source| SolverError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local = listener.local_addr()?;

        let tokens: Arc<Tokens> = Arc::default();
        let data = web::Data::from(tokens.clone());
        let route = format!("{}{{token}}", HTTP01_PATH_PREFIX);

        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("http-01".to_string())
            .spawn(move || {
                System::new().block_on(async move {
                    let server = HttpServer::new(move || {
                        App::new()
                            .app_data(data.clone())
                            .route(&route, web::get().to(serve_token))
                            .default_service(web::to(not_found))
                    })
                    .workers(1)
                    .listen(listener);

                    let server = match server {
                        Ok(server) => server.run(),
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = tx.send(Ok(server.handle()));

                    if let Err(e) = server.await {
                        error!("http-01 responder on {}: {}", local, e);
                    }
                });
            })?;

        let handle = rx.recv().map_err(|_| SolverError::Stopped)??;
        info!("http-01 responder listening on {}", local);

        Ok(Http01Responder {
            addr: local,
            tokens,
            handle,
            thread: Some(thread),
        })
    }

    /// 實際監聽的位址。
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// 關閉監聽並等待伺服器執行緒結束。
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for Http01Responder {
    fn drop(&mut self) {
        drop(self.handle.stop(false));
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        info!("http-01 responder on {} stopped", self.addr);
    }
}

impl ChallengeSolver for Http01Responder {
    fn present(&self, domain: &str, token: &str, key_authorization: &str) -> Result<(), SolverError> {
        info!("serving http-01 token for {} on {}", domain, self.addr);
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_string(), key_authorization.to_string());
        Ok(())
    }

    fn cleanup(&self, _domain: &str, token: &str) -> Result<(), SolverError> {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use reqwest::{blocking::Client, StatusCode};

    use super::*;

    #[test]
    fn test_serves_presented_tokens() {
        let responder = Http01Responder::start("127.0.0.1:0").unwrap();
        let base = format!("http://{}", responder.local_addr());
        let http = Client::new();

        responder.present("a.example", "tok-a", "tok-a.thumb").unwrap();
        responder.present("b.example", "tok-b", "tok-b.thumb").unwrap();

        let res = http
            .get(format!("{}/.well-known/acme-challenge/tok-a", base))
            .send()
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.text().unwrap(), "tok-a.thumb");

        responder.cleanup("a.example", "tok-a").unwrap();
        let res = http
            .get(format!("{}/.well-known/acme-challenge/tok-a", base))
            .send()
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = http
            .get(format!("{}/.well-known/acme-challenge/tok-b", base))
            .send()
            .unwrap();
        assert_eq!(res.text().unwrap(), "tok-b.thumb");

        let res = http.get(format!("{}/index.html", base)).send().unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_bind_failure() {
        let responder = Http01Responder::start("127.0.0.1:0").unwrap();
        let addr = responder.local_addr().to_string();

        assert!(matches!(
            Http01Responder::start(&addr),
            Err(SolverError::Bind { .. })
        ));
    }
}
