
use super::*;
use crate::downloader::test_helpers::{
    Script, create_test_downloader, create_test_downloader_with, next_result, request_in,
    test_config, wait_for_state, wait_until_idle,
};
use crate::types::{DownloadRequest, DownloadResult, StateKind, TaskId, TaskState};
use std::time::Duration;
