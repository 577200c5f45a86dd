use std::io::Cursor;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// A 2x2 PNG, encoded at startup so the decoder always accepts it.
pub fn cover_png() -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(2, 2, image::Rgba([30, 90, 160, 255]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode cover png");
    out.into_inner()
}

/// Served as-is; never decoded because the extension already matches.
pub static PAGE_WEBP: &[u8] = b"RIFF\x0c\x00\x00\x00WEBPVP8 verbatim";

pub const TITLE: &str = "Omniscient Reader?";
pub const TITLE_DIR: &str = "Omniscient Reader";

pub struct SiteServer {
    pub base_url: String,
    shutdown: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Drop for SiteServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Listing at `/manga/omniscient/` with chapters 2 and 1 (newest first).
/// Chapter 1 lists three pages, the third of which is missing (404).
pub fn spawn_site() -> SiteServer {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let cover = cover_png();
    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            enum Body {
                Text(String),
                Bytes(Vec<u8>),
            }

            let body = match request.url() {
                "/manga/omniscient/" => Some(Body::Text(format!(
                    r#"<!doctype html>
<html><body>
  <h1 class="title">{TITLE}</h1>
  <div class="cover"><img src="/covers/omniscient.png?w=300" /></div>
  <table id="chapters">
    <tr><td><a href="/omniscient-chapter-2/">Chapter 2</a></td><td class="views">3.4k</td></tr>
    <tr><td><a href="/omniscient-chapter-1/">Chapter 1</a></td><td class="views">12k</td></tr>
  </table>
</body></html>
"#
                ))),
                "/omniscient-chapter-1/" => Some(Body::Text(
                    r#"<div id="reader">
  <img data-src="/img/1/1.png" />
  <img data-src="/img/1/2.webp" />
  <img data-src="/img/1/3.png" />
</div>"#
                        .to_string(),
                )),
                "/omniscient-chapter-2/" => Some(Body::Text(
                    r#"<div id="reader"><img data-src="/img/2/1.png" /></div>"#.to_string(),
                )),
                "/covers/omniscient.png" | "/img/1/1.png" | "/img/2/1.png" => {
                    Some(Body::Bytes(cover.clone()))
                }
                "/img/1/2.webp" => Some(Body::Bytes(PAGE_WEBP.to_vec())),
                _ => None,
            };

            let _ = match body {
                Some(Body::Text(text)) => request.respond(
                    tiny_http::Response::from_string(text).with_header(
                        tiny_http::Header::from_bytes("Content-Type", "text/html; charset=utf-8")
                            .expect("header"),
                    ),
                ),
                Some(Body::Bytes(bytes)) => {
                    request.respond(tiny_http::Response::from_data(bytes))
                }
                None => request
                    .respond(tiny_http::Response::from_string("not found").with_status_code(404)),
            };
        }
    });

    SiteServer {
        base_url,
        shutdown: shutdown_tx,
        handle: Some(handle),
    }
}

pub fn write_provider(dir: &Path, base_url: &str) {
    std::fs::create_dir_all(dir).expect("create providers dir");
    let yaml = format!(
        r#"base_url: {base_url}
title: h1.title
thumbnail:
  selector: div.cover img
  attr: src
chapter_rows: "table#chapters tr"
chapter_link:
  selector: a
  attr: href
chapter_number: a
chapter_views: td.views
page_images:
  selector: "div#reader img"
  attr: data-src
"#
    );
    std::fs::write(dir.join("testsite.yaml"), yaml).expect("write provider config");
}
