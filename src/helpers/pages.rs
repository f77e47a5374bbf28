//! HTML bodies served to the browser.

pub const MAX_FILES_PER_BATCH: usize = 20;

const STYLE: &str = r#"<style>
body{font-family:-apple-system,BlinkMacSystemFont,"Segoe UI",Roboto,sans-serif;background:#f4f5f7;margin:0;padding:24px;color:#222}
.card{max-width:640px;margin:0 auto;background:#fff;border-radius:12px;padding:28px;box-shadow:0 2px 12px rgba(0,0,0,.08)}
h1{font-size:22px;margin-top:0}
.drop{border:2px dashed #9aa5b1;border-radius:10px;padding:36px;text-align:center;cursor:pointer}
.drop.over{border-color:#2f80ed;background:#eef5ff}
.hint{color:#666;font-size:13px}
ul{list-style:none;padding:0}
li{padding:6px 0;border-bottom:1px solid #eee;font-size:14px}
.ok{color:#1e8e3e}.err{color:#d93025}
a.button,button{display:inline-block;margin-top:16px;padding:10px 18px;border-radius:8px;border:0;background:#2f80ed;color:#fff;text-decoration:none;font-size:15px}
</style>"#;

const UPLOAD_SCRIPT: &str = r#"<script>
const MAX_FILES = __MAX_FILES__;
const MAX_SIZE = 500 * 1024 * 1024;
const EXTENSIONS = ["mp3", "wav", "aac", "m4a", "flac", "ogg"];
const drop = document.getElementById("drop");
const input = document.getElementById("file");
const list = document.getElementById("list");

function row(text, cls) {
  const li = document.createElement("li");
  li.textContent = text;
  if (cls) li.className = cls;
  list.appendChild(li);
  return li;
}

async function send(file) {
  const ext = file.name.split(".").pop().toLowerCase();
  const li = row(file.name + " - waiting");
  if (!EXTENSIONS.includes(ext)) { li.textContent = file.name + " - unsupported format"; li.className = "err"; return; }
  if (file.size > MAX_SIZE) { li.textContent = file.name + " - larger than 500 MB"; li.className = "err"; return; }
  const form = new FormData();
  form.append("file", file, file.name);
  li.textContent = file.name + " - uploading";
  try {
    const res = await fetch("/", { method: "POST", body: form });
    li.textContent = file.name + (res.ok ? " - done" : " - failed");
    li.className = res.ok ? "ok" : "err";
  } catch (e) {
    li.textContent = file.name + " - failed";
    li.className = "err";
  }
}

async function handle(files) {
  let batch = Array.from(files);
  if (batch.length > MAX_FILES) {
    row("Only the first " + MAX_FILES + " files are uploaded", "err");
    batch = batch.slice(0, MAX_FILES);
  }
  for (const file of batch) { await send(file); }
}

drop.addEventListener("click", () => input.click());
input.addEventListener("change", () => handle(input.files));
drop.addEventListener("dragover", (e) => { e.preventDefault(); drop.classList.add("over"); });
drop.addEventListener("dragleave", () => drop.classList.remove("over"));
drop.addEventListener("drop", (e) => { e.preventDefault(); drop.classList.remove("over"); handle(e.dataTransfer.files); });
</script>"#;

fn page(title: &str, content: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title>{STYLE}</head>\n<body><div class=\"card\">{content}</div></body></html>\n"
    )
}

pub fn upload_page() -> String {
    let content = format!(
        "<h1>Send music to this device</h1>\
         <form method=\"post\" enctype=\"multipart/form-data\" onsubmit=\"return false\">\
         <div id=\"drop\" class=\"drop\">Drop audio files here or click to choose\
         <input id=\"file\" name=\"file\" type=\"file\" accept=\".mp3,.wav,.aac,.m4a,.flac,.ogg,audio/*\" multiple hidden></div>\
         </form>\
         <p class=\"hint\">Supported formats: MP3, WAV, AAC, M4A, FLAC, OGG. \
         Up to 500 MB per file, {MAX_FILES_PER_BATCH} files per batch.</p>\
         <ul id=\"list\"></ul>{}",
        UPLOAD_SCRIPT.replace("__MAX_FILES__", &MAX_FILES_PER_BATCH.to_string())
    );
    page("Upload music", &content)
}

pub fn success_page(filename: &str, size: usize) -> String {
    let content = format!(
        "<h1 class=\"ok\">Upload complete</h1>\
         <p><strong>{}</strong> ({})</p>\
         <p class=\"hint\">The file is being added to the library.</p>\
         <a class=\"button\" href=\"/\">Upload more</a>",
        escape_html(filename),
        human_size(size)
    );
    page("Upload complete", &content)
}

pub fn error_page(message: &str) -> String {
    let content = format!(
        "<h1 class=\"err\">Upload failed</h1><p>{}</p>\
         <a class=\"button\" href=\"/\">Try again</a>",
        escape_html(message)
    );
    page("Upload failed", &content)
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn human_size(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html("<a href=\"x\">'&'</a>"),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn sizes() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(3 * 1024 * 1024), "3.0 MB");
        assert_eq!(human_size(1536), "1.5 KB");
    }

    #[test]
    fn upload_page_advertises_limits() {
        let html = upload_page();
        assert!(html.contains("name=\"file\""));
        assert!(html.contains("500 MB"));
        assert!(html.contains("const MAX_FILES = 20;"));
        assert!(!html.contains("__MAX_FILES__"));
    }
}
