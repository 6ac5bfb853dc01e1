mod tasks;

use crate::types::DownloadRequest;

/// Request for `http://example.com/<id>.bin` saved under `/downloads`
pub(super) fn sample_request(id: &str) -> DownloadRequest {
    let url = url::Url::parse(&format!("http://example.com/{}.bin", id)).unwrap();
    DownloadRequest::in_directory(id, url, "/downloads", &format!("{}.bin", id))
}
