//! The demo page served at `/`.
//!
use crate::{
    context::AppContext,
    detector::DetectorState,
    overlay::{self, escape_html},
};

const STYLE: &str = r#"
    body { font-family: sans-serif; margin: 2em; }
    .invisible { opacity: 0.2; pointer-events: none; }
    .error { color: #b00020; font-weight: bold; }
    .detectOnClick { position: relative; float: left; width: 48%; margin: 2% 1%; cursor: pointer; }
    .detectOnClick img { width: 100%; }
    .videoView { position: relative; float: left; width: 48%; margin: 2% 1%; }
    .videoView img { display: block; }
    .highlighter { background: rgba(0, 255, 0, 0.25); border: 1px dashed #fff; z-index: 1; position: absolute; }
    .label { position: absolute; padding: 5px; margin: 0; background-color: #007f8b; color: #fff;
             border: 1px dashed rgba(255, 255, 255, 0.7); z-index: 2; font-size: 12px; }
"#;

const SCRIPT: &str = r#"
const demos = document.getElementById("demos");
const notice = document.getElementById("notice");

async function waitForDetector() {
  const status = await (await fetch("/status")).json();
  if (status.detector === "ready") {
    demos.classList.remove("invisible");
    notice.textContent = "";
  } else if (status.detector === "failed") {
    notice.textContent = "Object Detector failed to load: " + status.error;
    notice.classList.add("error");
  } else {
    setTimeout(waitForDetector, 500);
  }
}
waitForDetector();

for (const container of document.getElementsByClassName("detectOnClick")) {
  const img = container.querySelector("img");
  let generation = 0;
  img.addEventListener("click", async () => {
    const current = ++generation;
    for (const node of container.querySelectorAll(".highlighter, .label")) node.remove();
    const query = "?width=" + img.width + "&height=" + img.height;
    const resp = await fetch("/images/" + encodeURIComponent(img.dataset.name) + "/detect" + query, { method: "POST" });
    if (resp.status === 409) {
      alert(await resp.text());
      return;
    }
    if (resp.status !== 200 || current !== generation) return;
    const html = await resp.text();
    for (const node of container.querySelectorAll(".highlighter, .label")) node.remove();
    container.insertAdjacentHTML("beforeend", html);
  });
}

const webcamButton = document.getElementById("webcamButton");
const webcam = document.getElementById("webcam");
const liveView = document.getElementById("liveView");
let capturing = false;

function stopView() {
  capturing = false;
  webcam.removeAttribute("src");
  liveView.innerHTML = "";
  webcamButton.textContent = "ENABLE WEBCAM";
}

async function pollLiveView() {
  if (!capturing) return;
  liveView.innerHTML = await (await fetch("/live_view")).text();
  window.requestAnimationFrame(pollLiveView);
}

async function watchCapture() {
  if (!capturing) return;
  const status = await (await fetch("/status")).json();
  if (status.capture.state === "stopped") {
    stopView();
    if (status.capture.reason) notice.textContent = "Webcam stopped: " + status.capture.reason;
    return;
  }
  setTimeout(watchCapture, 1000);
}

if (!webcamButton.disabled) {
  webcamButton.addEventListener("click", async () => {
    if (capturing) {
      stopView();
      await fetch("/webcam/disable", { method: "POST" });
      return;
    }
    const resp = await fetch("/webcam/enable", { method: "POST" });
    if (!resp.ok) {
      notice.textContent = await resp.text();
      return;
    }
    capturing = true;
    webcam.src = "/video_stream";
    webcamButton.textContent = "DISABLE WEBCAM";
    pollLiveView();
    watchCapture();
  });
}
"#;

/// Render the page for the current state of the application.
pub fn render(context: &AppContext) -> String {
    let (demos_class, notice_class, notice) = match context.detector.state() {
        DetectorState::Loading => ("invisible", "", "Loading object detector...".to_owned()),
        DetectorState::Ready(_) => ("", "", String::new()),
        DetectorState::Failed(reason) => (
            "invisible",
            "error",
            format!("Object Detector failed to load: {reason}"),
        ),
    };

    let images: String = context
        .surface
        .images()
        .map(|target| {
            let name = escape_html(target.name());
            format!(
                r#"<div class="detectOnClick"><img src="/images/{name}" data-name="{name}" title="Click to detect objects">{}</div>"#,
                overlay::to_html(&target.overlays())
            )
        })
        .collect();

    let (button_disabled, capture_hint) = if context.capture.is_available() {
        ("", "")
    } else {
        ("disabled", "<p>Camera capture is not available on this server.</p>")
    };

    let video_size = match context.capture.config().display_size {
        Some((width, height)) => format!(r#"style="width: {width}px; height: {height}px;""#),
        None => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Object detection</title>
<style>{STYLE}</style>
</head>
<body>
<h1>Object detection</h1>
<p id="notice" class="{notice_class}">{notice}</p>
<section id="demos" class="{demos_class}">
<h2>Detecting images</h2>
<p>Click on an image to see the objects detected in it.</p>
{images}
<h2 style="clear: both">Webcam continuous detection</h2>
{capture_hint}
<button id="webcamButton" {button_disabled}>ENABLE WEBCAM</button>
<div id="liveViewContainer" class="videoView">
<img id="webcam" alt="" {video_size}>
<div id="liveView"></div>
</div>
</section>
<script>{SCRIPT}</script>
</body>
</html>"#,
        notice = escape_html(&notice),
    )
}
