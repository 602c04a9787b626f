use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;

use fgvc_core::{FgvcError, Result};

/// Blocking GET of `url` into `dest`.
///
/// The body is streamed to `<dest>.part` and renamed on success, so an
/// interrupted transfer never leaves a file that looks complete. Network
/// errors are returned as-is; there are no retries.
pub fn fetch(url: &str, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    tracing::info!(url, dest = %dest.display(), "downloading");

    let response = ureq::get(url)
        .call()
        .map_err(|e| FgvcError::Download(format!("{}: {}", url, e)))?;

    let mut partial = dest.as_os_str().to_owned();
    partial.push(".part");
    let partial = Path::new(&partial).to_path_buf();

    let written = {
        let mut writer = BufWriter::new(File::create(&partial)?);
        let mut reader = response.into_reader();
        match io::copy(&mut reader, &mut writer) {
            Ok(n) => n,
            Err(e) => {
                drop(writer);
                let _ = fs::remove_file(&partial);
                return Err(FgvcError::Download(format!("{}: {}", url, e)));
            }
        }
    };
    fs::rename(&partial, dest)?;

    tracing::info!(bytes = written, "download finished");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    fn serve_once(body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            write!(stream, "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n", body.len()).unwrap();
            stream.write_all(body).unwrap();
        });
        format!("http://{}/CUB_200_2011.tgz?download=1", addr)
    }

    #[test]
    fn body_is_written_to_destination() {
        let url = serve_once(b"archive bytes");
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("CUB_200_2011.tgz");

        let written = fetch(&url, &dest).unwrap();

        assert_eq!(written, 13);
        assert_eq!(fs::read(&dest).unwrap(), b"archive bytes");
        assert!(!dir.path().join("nested").join("CUB_200_2011.tgz.part").exists());
    }

    #[test]
    fn connection_failure_is_reported() {
        // Bind then drop to get a port with no listener.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("archive.tgz");

        let err = fetch(&format!("http://127.0.0.1:{}/archive.tgz", port), &dest).unwrap_err();

        assert!(matches!(err, FgvcError::Download(_)));
        assert!(!dest.exists());
    }
}
