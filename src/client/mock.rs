//! Scripted in-memory transport for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};

use super::{
    AgentApi, ApiError, CreateFileResponse, CreateTaskRequest, CreateTaskResponse, TaskDetail,
    WebhookRegistration,
};
use crate::task::TaskStatus;

/// Fake [`AgentApi`] with scripted responses and call accounting.
///
/// Each call pops a scripted result when one is queued, falling back to a
/// plausible default otherwise.
#[derive(Default)]
pub(crate) struct MockApi {
    file_counter: AtomicU32,
    task_counter: AtomicU32,
    upload_calls: AtomicU32,
    get_task_calls: AtomicU32,
    create_file_queue: Mutex<VecDeque<Result<CreateFileResponse, ApiError>>>,
    upload_queue: Mutex<VecDeque<Result<(), ApiError>>>,
    create_task_queue: Mutex<VecDeque<Result<CreateTaskResponse, ApiError>>>,
    get_task_queue: Mutex<VecDeque<Result<TaskDetail, ApiError>>>,
    create_task_requests: Mutex<Vec<CreateTaskRequest>>,
    uploaded_urls: Mutex<Vec<String>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_create_file(&self, result: Result<CreateFileResponse, ApiError>) {
        self.create_file_queue.lock().unwrap().push_back(result);
    }

    pub fn queue_upload(&self, result: Result<(), ApiError>) {
        self.upload_queue.lock().unwrap().push_back(result);
    }

    pub fn queue_create_task(&self, result: Result<CreateTaskResponse, ApiError>) {
        self.create_task_queue.lock().unwrap().push_back(result);
    }

    pub fn queue_get_task(&self, result: Result<TaskDetail, ApiError>) {
        self.get_task_queue.lock().unwrap().push_back(result);
    }

    pub fn upload_call_count(&self) -> u32 {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn get_task_call_count(&self) -> u32 {
        self.get_task_calls.load(Ordering::SeqCst)
    }

    pub fn create_task_requests(&self) -> Vec<CreateTaskRequest> {
        self.create_task_requests.lock().unwrap().clone()
    }

    pub fn uploaded_urls(&self) -> Vec<String> {
        self.uploaded_urls.lock().unwrap().clone()
    }

    /// A file record expiring the usual three minutes from now.
    pub fn file_record(id: &str, filename: &str) -> CreateFileResponse {
        CreateFileResponse {
            id: id.to_string(),
            filename: filename.to_string(),
            status: Some("pending_upload".to_string()),
            upload_url: format!("https://uploads.example/{}", id),
            upload_expires_at: Utc::now() + ChronoDuration::minutes(3),
            created_at: Some(Utc::now()),
        }
    }

    /// A detail payload for a still-running task.
    pub fn running_detail(task_id: &str) -> TaskDetail {
        TaskDetail {
            task_id: task_id.to_string(),
            status: Some(TaskStatus::Running),
            task_title: None,
            task_url: None,
            message: None,
            attachments: Vec::new(),
            stop_reason: None,
        }
    }
}

#[async_trait]
impl AgentApi for MockApi {
    async fn create_file(&self, filename: &str) -> Result<CreateFileResponse, ApiError> {
        if let Some(scripted) = self.create_file_queue.lock().unwrap().pop_front() {
            return scripted;
        }
        let n = self.file_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Self::file_record(&format!("file-{}", n), filename))
    }

    async fn upload_file_content(
        &self,
        upload_url: &str,
        _content: Bytes,
    ) -> Result<(), ApiError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.uploaded_urls
            .lock()
            .unwrap()
            .push(upload_url.to_string());
        if let Some(scripted) = self.upload_queue.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(())
    }

    async fn create_task(
        &self,
        request: &CreateTaskRequest,
    ) -> Result<CreateTaskResponse, ApiError> {
        self.create_task_requests
            .lock()
            .unwrap()
            .push(request.clone());
        if let Some(scripted) = self.create_task_queue.lock().unwrap().pop_front() {
            return scripted;
        }
        let n = self.task_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let task_id = format!("task-{}", n);
        Ok(CreateTaskResponse {
            task_url: Some(format!("https://app.example/tasks/{}", task_id)),
            task_id,
            task_title: Some("mock task".to_string()),
            share_url: None,
        })
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskDetail, ApiError> {
        self.get_task_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.get_task_queue.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(Self::running_detail(task_id))
    }

    async fn register_webhook(&self, url: &str) -> Result<WebhookRegistration, ApiError> {
        Ok(WebhookRegistration {
            webhook_id: "wh-1".to_string(),
            url: Some(url.to_string()),
        })
    }

    async fn delete_webhook(&self, _webhook_id: &str) -> Result<(), ApiError> {
        Ok(())
    }
}
