#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use uuid::Uuid;

use chunkmill::common::error::{StorageError, StorageResult};
use chunkmill::config::settings::PipelineSettings;
use chunkmill::infrastructure::notify::Notifier;
use chunkmill::infrastructure::queue::JobDispatcher;
use chunkmill::infrastructure::storage::{ObjectReader, ObjectStore, UploadPart};
use chunkmill::modules::jobs::model::{JobRecord, JobStatus};
use chunkmill::modules::jobs::repository::JobStore;

struct Session {
    key: String,
    parts: BTreeMap<i32, Bytes>,
}

/// Object store keeping every object as a file below `root`. Presigned GET
/// URLs are plain local paths so the fake encoder can read them.
pub struct DirStore {
    root: PathBuf,
    sessions: Mutex<HashMap<String, Session>>,
    /// `(key fragment, delay)` applied to matching part uploads.
    delays: Mutex<Vec<(String, Duration)>>,
    /// `(step, count)`: part `n` sleeps `step * (count - n)`, so later parts
    /// finish first.
    reverse_parts: Mutex<Option<(Duration, i32)>>,
    /// Part uploads for keys containing this fragment fail.
    failing: Mutex<Option<String>>,
    pub completed: Mutex<Vec<(String, usize)>>,
    pub aborted: Mutex<Vec<String>>,
    pub part_sizes: Mutex<Vec<usize>>,
}

impl DirStore {
    pub fn new(root: &Path) -> Arc<Self> {
        std::fs::create_dir_all(root).unwrap();
        Arc::new(Self {
            root: root.to_path_buf(),
            sessions: Mutex::new(HashMap::new()),
            delays: Mutex::new(Vec::new()),
            reverse_parts: Mutex::new(None),
            failing: Mutex::new(None),
            completed: Mutex::new(Vec::new()),
            aborted: Mutex::new(Vec::new()),
            part_sizes: Mutex::new(Vec::new()),
        })
    }

    pub fn path_of(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn delay_uploads(&self, fragment: &str, delay: Duration) {
        self.delays.lock().unwrap().push((fragment.to_string(), delay));
    }

    pub fn reverse_part_completion(&self, step: Duration, count: i32) {
        *self.reverse_parts.lock().unwrap() = Some((step, count));
    }

    pub fn fail_uploads(&self, fragment: &str) {
        *self.failing.lock().unwrap() = Some(fragment.to_string());
    }

    pub fn insert(&self, key: &str, body: &[u8]) {
        let path = self.path_of(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        std::fs::read(self.path_of(key)).ok()
    }

    /// Multipart sessions created but neither completed nor aborted.
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        collect_keys(&self.root, &self.root, &mut keys);
        keys.sort();
        keys
    }
}

fn collect_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_keys(root, &path, keys);
        } else if let Ok(rel) = path.strip_prefix(root) {
            keys.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}

#[async_trait]
impl ObjectStore for DirStore {
    async fn create_multipart_upload(&self, key: &str, _content_type: &str) -> StorageResult<String> {
        let id = Uuid::new_v4().to_string();
        self.sessions.lock().unwrap().insert(
            id.clone(),
            Session {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<UploadPart> {
        let delay = self
            .delays
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| key.contains(fragment.as_str()))
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let reverse = *self.reverse_parts.lock().unwrap();
        if let Some((step, count)) = reverse {
            let factor = u32::try_from((count - part_number).max(0)).unwrap_or(0);
            tokio::time::sleep(step * factor).await;
        }

        let failing = self.failing.lock().unwrap().clone();
        if failing.is_some_and(|fragment| key.contains(fragment.as_str())) {
            return Err(StorageError::Request(format!("injected failure for {key}")));
        }

        self.part_sizes.lock().unwrap().push(body.len());
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::NotFound(upload_id.to_string()))?;
        session.parts.insert(part_number, body);
        Ok(UploadPart {
            part_number,
            etag: format!("etag-{part_number}"),
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadPart>,
    ) -> StorageResult<()> {
        let session = self
            .sessions
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| StorageError::NotFound(upload_id.to_string()))?;
        assert_eq!(session.key, key);
        assert!(
            parts.windows(2).all(|w| w[0].part_number < w[1].part_number),
            "parts must be sorted"
        );

        let mut body = Vec::new();
        for part in &parts {
            let bytes = session
                .parts
                .get(&part.part_number)
                .ok_or_else(|| StorageError::Request(format!("missing part {}", part.part_number)))?;
            body.extend_from_slice(bytes);
        }
        self.insert(key, &body);
        self.completed.lock().unwrap().push((key.to_string(), parts.len()));
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.sessions.lock().unwrap().remove(upload_id);
        self.aborted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn put_object(&self, key: &str, body: Bytes, _content_type: &str) -> StorageResult<()> {
        self.insert(key, &body);
        Ok(())
    }

    async fn open_object(&self, key: &str) -> StorageResult<ObjectReader> {
        match tokio::fs::File::open(self.path_of(key)).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn presign_get(&self, key: &str, _expires_in: Duration) -> StorageResult<String> {
        Ok(self.path_of(key).to_string_lossy().into_owned())
    }

    async fn presign_put(&self, key: &str, _expires_in: Duration) -> StorageResult<String> {
        Ok(format!("file://{}", self.path_of(key).display()))
    }

    async fn delete_prefixes(&self, prefixes: &[String]) -> StorageResult<usize> {
        let mut deleted = 0;
        for key in self.keys() {
            if prefixes.iter().any(|p| key.starts_with(p.as_str())) {
                std::fs::remove_file(self.path_of(&key))?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: tokio::sync::Mutex<HashMap<Uuid, JobRecord>>,
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn put(&self, job: &JobRecord) -> Result<()> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn transition(&self, id: Uuid, from: JobStatus, to: JobStatus) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("job {id} not found"))?;
        if job.status != from {
            return Ok(false);
        }
        job.status = to;
        job.touch();
        Ok(true)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, connections: &[String], message: &str) {
        let mut sent = self.sent.lock().unwrap();
        for id in connections {
            sent.push((id.clone(), message.to_string()));
        }
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    pub dispatched: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(&self, job_id: Uuid) -> Result<()> {
        self.dispatched.lock().unwrap().push(job_id);
        Ok(())
    }
}

/// Behaviour knobs of the fake encoder script.
#[derive(Clone, Copy)]
pub struct FakeEncoder {
    /// Exit code after segmenting.
    pub split_exit: i32,
    /// Number of chunks written before a failing split exits.
    pub split_fail_after: Option<usize>,
    /// Pause between two segments, in seconds.
    pub segment_pause: f32,
    /// Seconds to hang before writing anything while segmenting.
    pub split_stall: Option<u32>,
    /// Exit code after concatenating, once all output was written.
    pub concat_exit: i32,
}

impl Default for FakeEncoder {
    fn default() -> Self {
        Self {
            split_exit: 0,
            split_fail_after: None,
            segment_pause: 0.05,
            split_stall: None,
            concat_exit: 0,
        }
    }
}

/// Scratch tree of one test: object store root, scratch dir, encoder stand-ins
/// and the log of every encoder invocation.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<DirStore>,
    pub settings: PipelineSettings,
    pub log: PathBuf,
}

impl Harness {
    pub fn new(encoder: FakeEncoder) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(&dir.path().join("bucket"));
        let log = dir.path().join("encoder.log");
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();

        let ffmpeg = bin.join("ffmpeg");
        write_script(&ffmpeg, &ffmpeg_script(&log, encoder));
        let ffprobe = bin.join("ffprobe");
        write_script(&ffprobe, FFPROBE_SCRIPT);

        let settings = PipelineSettings {
            encoder_path: ffmpeg,
            prober_path: ffprobe,
            scratch_dir: dir.path().join("scratch"),
            chunk_seconds: 10,
            part_size_bytes: 5,
            workers_per_core: 2,
            poll_interval: Duration::from_millis(10),
            chunk_wait_timeout: Duration::from_secs(10),
            encoder_timeout: Duration::from_secs(30),
            presign_expiry: Duration::from_secs(60),
        };

        Self {
            dir,
            store,
            settings,
            log,
        }
    }

    pub fn storage(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    /// Encoder invocations in call order.
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// A source the fake encoder will cut into `seconds / chunk_seconds`
    /// chunks.
    pub fn put_source(&self, key: &str, seconds: u32) {
        self.store.insert(key, format!("duration={seconds}\n").as_bytes());
    }
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

const FFPROBE_SCRIPT: &str = r#"#!/usr/bin/env bash
mode=v
for a in "$@"; do
  case "$a" in
    a:0) mode=a ;;
  esac
done
if [ "$mode" = v ]; then
  printf 'width=1280\nheight=720\ncodec_name=h264\n'
else
  printf 'aac\n'
fi
"#;

fn ffmpeg_script(log: &Path, encoder: FakeEncoder) -> String {
    let fail_after = encoder
        .split_fail_after
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-1".to_string());
    let stall = encoder.split_stall.unwrap_or(0);

    format!(
        r#"#!/usr/bin/env bash
echo "$*" >> '{log}'
args=("$@")
n=${{#args[@]}}
out="${{args[$((n-1))]}}"
input=""; seg=10; segment=0; concat=0; vn=0
for ((i=0; i<n; i++)); do
  case "${{args[$i]}}" in
    -i) input="${{args[$((i+1))]}}" ;;
    -segment_time) seg="${{args[$((i+1))]}}" ;;
    -f)
      case "${{args[$((i+1))]}}" in
        segment) segment=1 ;;
        concat) concat=1 ;;
      esac ;;
    -vn) vn=1 ;;
  esac
done

if [ "$segment" = 1 ]; then
  sleep {stall}
  duration=$(sed -n 's/^duration=//p' "$input")
  count=$(( (duration + seg - 1) / seg ))
  for ((c=0; c<count; c++)); do
    if [ {fail_after} -ge 0 ] && [ "$c" -ge {fail_after} ]; then
      echo "segmenting failed at chunk $c" >&2
      exit {exit}
    fi
    printf 'chunk-%d|' "$c" > "${{out/\%d/$c}}"
    sleep {pause}
  done
  exit {exit}
fi

if [ "$concat" = 1 ]; then
  sed -n "s/^file '\(.*\)'$/\1/p" "$input" | while read -r f; do cat "$f"; done
  if [ {concat_exit} -ne 0 ]; then
    echo "concat muxer failed" >&2
  fi
  exit {concat_exit}
fi

if [ "$vn" = 1 ]; then
  printf 'audio' > "$out"
  exit 0
fi

{{ cat "$input"; printf 'T'; }} > "$out"
"#,
        log = log.display(),
        stall = stall,
        fail_after = fail_after,
        exit = encoder.split_exit,
        pause = encoder.segment_pause,
        concat_exit = encoder.concat_exit,
    )
}
