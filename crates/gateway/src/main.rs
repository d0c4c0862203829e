// BSD 3-Clause License
// Copyright (c) 2026, Virtual Cable S.L.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice,
//    this list of conditions and the following disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice,
//    this list of conditions and the following disclaimer in the documentation
//    and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors
//    may be used to endorse or promote products derived from this software
//    without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
// AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
// IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
// FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
// DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
// CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
// OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
//
// Authors: Adolfo Gómez, dkmaster at dkmon dot com

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::{net::TcpListener, signal};

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use relay_gateway::collaborators::EventBus;
use relay_gateway::dispatch::Collaborators;
use relay_gateway::production::{
    FilesystemUploadSink, NoopEventBus, NoopProcessSupervisor, PassthroughAugmenter,
    ReqwestHttpMux,
};
use relay_gateway::{config, consts, ws};
use relay_protocol::{log, system::trigger::Trigger};

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    log::setup_logging(consts::DEFAULT_LOG_LEVEL, log::LogType::Gateway);

    let gateway_config = config::get();
    let listen_addr = {
        let config = gateway_config.read().unwrap();
        config.listen_sockaddr()
    };
    let http_mux_base_url = gateway_config.read().unwrap().http_mux_base_url.clone();

    let event_bus: Arc<dyn EventBus> = Arc::new(NoopEventBus);
    let collaborators = Arc::new(Collaborators {
        http_mux: Arc::new(ReqwestHttpMux::new(http_mux_base_url)),
        supervisor: Arc::new(NoopProcessSupervisor),
        event_bus,
        upload_sink: Arc::new(FilesystemUploadSink::new("./uploads".into())),
        make_augmenter: Arc::new(|| Box::new(PassthroughAugmenter)),
    });

    let stop = Trigger::new();

    let state = ws::GatewayState {
        config: gateway_config,
        collaborators,
        stop: stop.clone(),
    };

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    let listener = TcpListener::bind(listen_addr).await.unwrap();
    log::info!("Listening on {}", listen_addr);

    {
        let stop = stop.clone();
        tokio::spawn(async move {
            let ctrl_c = signal::ctrl_c();
            #[cfg(unix)]
            let mut terminate =
                unix_signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

            #[cfg(unix)]
            tokio::select! {
                _ = ctrl_c => {
                    log::info!("Received Ctrl-C, shutting down");
                }
                _ = terminate.recv() => {
                    log::info!("Received SIGTERM, shutting down");
                }
            }
            #[cfg(not(unix))]
            {
                ctrl_c.await.expect("Failed to listen for Ctrl-C");
                log::info!("Received Ctrl-C, shutting down");
            }
            stop.trigger();
        });
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move { stop.wait_async().await })
    .await
    .unwrap();
}
