use std::{net::SocketAddr, time::Duration};

use poem::{
    get, handler,
    http::{StatusCode, Uri},
    listener::TcpListener,
    middleware::AddData,
    web::Data,
    Endpoint, EndpointExt, IntoResponse, Response, Server,
};

use crate::exporter::{Exporter, Session};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct HttpSession {
    url: String,
    response: Option<(u16, String)>,
}
impl Session for HttpSession {
    fn request_url(&self) -> &str {
        &self.url
    }
    fn write_response(&mut self, status: u16, body: String) {
        self.response = Some((status, body));
    }
}
impl IntoResponse for HttpSession {
    fn into_response(self) -> Response {
        let Some((status, body)) = self.response else {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };
        json_response(StatusCode::from_u16(status).unwrap_or(StatusCode::OK), body)
    }
}

fn json_response(status: StatusCode, body: String) -> Response {
    Response::builder()
        .status(status)
        .content_type("application/json")
        .body(body)
}

#[handler]
async fn export(uri: &Uri, exporter: Data<&Exporter>) -> Response {
    let url = uri
        .path_and_query()
        .map(|path_and_query| path_and_query.as_str())
        .unwrap_or("/")
        .to_string();
    let exporter = exporter.0.clone();
    // Hooks and history locks block; keep them off the async workers
    let session = tokio::task::spawn_blocking(move || {
        let mut session = HttpSession {
            url,
            response: None,
        };
        exporter.on_request(&mut session);
        session
    })
    .await;
    match session {
        Ok(session) => session.into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "export task failed");
            json_response(StatusCode::OK, "{}".to_string())
        }
    }
}

/// Answers every `GET` with the exporter, whatever the path.
pub fn endpoint(exporter: Exporter) -> impl Endpoint {
    get(export).with(AddData::new(exporter))
}

/// Serves `exporter` on `listen` until ctrl-c.
pub async fn serve(listen: SocketAddr, exporter: Exporter) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen);
    tracing::info!(%listen, "serving metrics");
    Server::new(listener)
        .run_with_graceful_shutdown(
            endpoint(exporter),
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
            Some(SHUTDOWN_TIMEOUT),
        )
        .await?;
    tracing::info!("metrics server stopped");
    Ok(())
}
