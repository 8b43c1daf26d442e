//! Streaming uploads and downloads layered on the request pipeline.
//!
//! Both directions reuse [`ApiClient::run`], so uploads and downloads get the same credential
//! handling, refresh hand-off, and retry policy as plain requests. A retried transfer starts
//! over: upload progress restarts from the first chunk and download sinks are reset through
//! [`DownloadSink::begin`].

// std
use std::{
	fs::{self, File},
	io::{self, Write},
	path::{Path, PathBuf},
};
// crates.io
use futures::StreamExt;
// self
use crate::{
	_prelude::*,
	client::{ApiClient, ApiResponse, Buffered, Consume, RequestBody, RequestDescriptor, RequestId},
	http::{HttpTransport, Method, TransportResponse},
	normalize::RawFailure,
	obs::{self, CallKind},
};

/// Progress callback receiving whole percentages in `1..=100`.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Size of each upload chunk handed to the transport.
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// In-memory file payload for multipart uploads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadFile {
	/// File name sent in the part's `Content-Disposition`.
	pub file_name: String,
	/// MIME type of the part.
	pub content_type: String,
	/// File contents.
	pub bytes: Bytes,
}
impl UploadFile {
	/// Fallback MIME type.
	pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

	/// Wraps `bytes` under `file_name` with the fallback MIME type.
	pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
		Self {
			file_name: file_name.into(),
			content_type: Self::DEFAULT_CONTENT_TYPE.into(),
			bytes: bytes.into(),
		}
	}

	/// Overrides the MIME type.
	pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
		self.content_type = content_type.into();

		self
	}

	/// Reads a file from disk, naming the part after the file.
	pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
		let path = path.as_ref();
		let file_name = path
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_else(|| "file".into());

		Ok(Self::new(file_name, fs::read(path)?))
	}

	/// Payload length in bytes.
	pub fn len(&self) -> u64 {
		u64::try_from(self.bytes.len()).unwrap_or(u64::MAX)
	}

	/// Returns `true` for an empty payload.
	pub fn is_empty(&self) -> bool {
		self.bytes.is_empty()
	}
}

/// Multipart form with one file part plus optional text fields.
#[derive(Clone)]
pub struct MultipartUpload {
	/// Form field carrying the file.
	pub field_name: String,
	/// File part.
	pub file: UploadFile,
	/// Extra text fields, sent before the file part.
	pub fields: Vec<(String, String)>,
	/// Optional progress callback.
	pub progress: Option<ProgressFn>,
}
impl MultipartUpload {
	/// Default form field for the file part.
	pub const DEFAULT_FIELD_NAME: &str = "file";

	/// Creates an upload of `file` under the default field name.
	pub fn new(file: UploadFile) -> Self {
		Self {
			field_name: Self::DEFAULT_FIELD_NAME.into(),
			file,
			fields: Vec::new(),
			progress: None,
		}
	}

	/// Adds a text field.
	pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.fields.push((name.into(), value.into()));

		self
	}

	/// Installs a progress callback.
	pub fn on_progress(mut self, progress: ProgressFn) -> Self {
		self.progress = Some(progress);

		self
	}

	/// Splits the file into transport chunks, reporting progress as each chunk is taken.
	///
	/// Percentages are reported only when they increase and always end at 100, including for
	/// an empty file. Each call starts a fresh pass.
	pub fn chunks(&self) -> UploadChunks {
		UploadChunks {
			bytes: self.file.bytes.clone(),
			offset: 0,
			reported: 0,
			progress: self.progress.clone(),
		}
	}
}
impl Debug for MultipartUpload {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MultipartUpload")
			.field("field_name", &self.field_name)
			.field("file_name", &self.file.file_name)
			.field("len", &self.file.len())
			.field("fields", &self.fields)
			.field("progress", &self.progress.is_some())
			.finish()
	}
}

/// Iterator returned by [`MultipartUpload::chunks`].
pub struct UploadChunks {
	bytes: Bytes,
	offset: usize,
	reported: u8,
	progress: Option<ProgressFn>,
}
impl UploadChunks {
	fn report(&mut self, percent: u8) {
		if percent <= self.reported {
			return;
		}

		self.reported = percent;

		if let Some(progress) = &self.progress {
			progress(percent);
		}
	}
}
impl Iterator for UploadChunks {
	type Item = Bytes;

	fn next(&mut self) -> Option<Self::Item> {
		let total = self.bytes.len();

		if self.offset >= total {
			self.report(100);

			return None;
		}

		let end = (self.offset + UPLOAD_CHUNK_SIZE).min(total);
		let chunk = self.bytes.slice(self.offset..end);

		self.offset = end;
		self.report(percent(end as u64, total as u64));

		Some(chunk)
	}
}
impl Debug for UploadChunks {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("UploadChunks")
			.field("offset", &self.offset)
			.field("len", &self.bytes.len())
			.field("reported", &self.reported)
			.finish()
	}
}

/// Destination for a streamed download.
pub trait DownloadSink
where
	Self: Send,
{
	/// Starts (or restarts, after a retry) a transfer; discards anything written before.
	fn begin(&mut self, expected_len: Option<u64>) -> io::Result<()>;

	/// Appends one body chunk.
	fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

	/// Completes the transfer once the whole body was written.
	fn finish(&mut self) -> io::Result<()>;
}

/// Collects the body in memory.
#[derive(Clone, Debug, Default)]
pub struct BufferSink {
	buf: Vec<u8>,
}
impl BufferSink {
	/// Consumes the sink, returning the collected body.
	pub fn into_bytes(self) -> Bytes {
		Bytes::from(self.buf)
	}
}
impl DownloadSink for BufferSink {
	fn begin(&mut self, expected_len: Option<u64>) -> io::Result<()> {
		self.buf.clear();

		if let Some(len) = expected_len.and_then(|len| usize::try_from(len).ok()) {
			self.buf.reserve(len);
		}

		Ok(())
	}

	fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
		self.buf.extend_from_slice(chunk);

		Ok(())
	}

	fn finish(&mut self) -> io::Result<()> {
		Ok(())
	}
}

/// Writes the body to `<dest>.part` and renames it onto `dest` once complete.
#[derive(Debug)]
pub struct FileSink {
	dest: PathBuf,
	partial: PathBuf,
	file: Option<File>,
}
impl FileSink {
	/// Creates a sink targeting `dest`.
	pub fn new(dest: impl Into<PathBuf>) -> Self {
		let dest = dest.into();
		let mut partial = dest.clone().into_os_string();

		partial.push(".part");

		Self { dest, partial: partial.into(), file: None }
	}

	/// Final destination path.
	pub fn dest(&self) -> &Path {
		&self.dest
	}

	/// Removes a partially written body.
	pub fn discard(&mut self) {
		self.file = None;

		let _ = fs::remove_file(&self.partial);
	}
}
impl DownloadSink for FileSink {
	fn begin(&mut self, _expected_len: Option<u64>) -> io::Result<()> {
		if let Some(parent) = self.dest.parent()
			&& !parent.as_os_str().is_empty()
		{
			fs::create_dir_all(parent)?;
		}

		self.file = Some(File::create(&self.partial)?);

		Ok(())
	}

	fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
		match &mut self.file {
			Some(file) => file.write_all(chunk),
			None => Err(io::Error::other("Download sink was written before it began.")),
		}
	}

	fn finish(&mut self) -> io::Result<()> {
		let Some(mut file) = self.file.take() else {
			return Err(io::Error::other("Download sink finished before it began."));
		};

		file.flush()?;
		file.sync_all()?;

		drop(file);

		fs::rename(&self.partial, &self.dest)
	}
}

/// Summary of a completed download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadReport {
	/// Status of the successful response.
	pub status: u16,
	/// Bytes handed to the sink.
	pub bytes_written: u64,
	/// Identifier of the dispatch that produced the body.
	pub request_id: RequestId,
	/// Response `Content-Type`, when sent.
	pub content_type: Option<String>,
}

impl<T> ApiClient<T>
where
	T: ?Sized + HttpTransport,
{
	/// Uploads `file` as multipart form field `file`, plus `extra_fields` as text fields.
	pub async fn upload<I, K, V>(
		&self,
		path: impl Into<String>,
		file: UploadFile,
		on_progress: Option<ProgressFn>,
		extra_fields: I,
	) -> Result<ApiResponse>
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		let mut upload = MultipartUpload::new(file);

		upload.progress = on_progress;

		for (name, value) in extra_fields {
			upload = upload.field(name, value);
		}

		self.upload_multipart(path, upload).await
	}

	/// Uploads a prepared multipart form with `POST`.
	pub async fn upload_multipart(
		&self,
		path: impl Into<String>,
		upload: MultipartUpload,
	) -> Result<ApiResponse> {
		let kind = CallKind::Upload;
		let descriptor =
			RequestDescriptor::new(Method::Post, path).body(RequestBody::Multipart(upload));

		obs::observe_call(kind, descriptor.method, &descriptor.path, async {
			self.run(&descriptor, kind, self.config.transfer_timeout, &mut Buffered).await
		})
		.await
	}

	/// Streams `GET path` into `sink`.
	pub async fn download<S>(&self, path: impl Into<String>, sink: &mut S) -> Result<DownloadReport>
	where
		S: ?Sized + DownloadSink,
	{
		self.download_request(RequestDescriptor::get(path), sink, None).await
	}

	/// Streams `GET path` into `sink`, reporting progress when the length is known.
	pub async fn download_with_progress<S>(
		&self,
		path: impl Into<String>,
		sink: &mut S,
		progress: ProgressFn,
	) -> Result<DownloadReport>
	where
		S: ?Sized + DownloadSink,
	{
		self.download_request(RequestDescriptor::get(path), sink, Some(progress)).await
	}

	/// Streams `GET path` into the file `filename`, leaving no partial file behind on failure.
	pub async fn download_to_file(
		&self,
		path: impl Into<String>,
		filename: impl Into<PathBuf>,
	) -> Result<DownloadReport> {
		let mut sink = FileSink::new(filename);
		let result = self.download(path, &mut sink).await;

		if result.is_err() {
			sink.discard();
		}

		result
	}

	/// Streams the response to an arbitrary descriptor into `sink`.
	pub async fn download_request<S>(
		&self,
		descriptor: RequestDescriptor,
		sink: &mut S,
		progress: Option<ProgressFn>,
	) -> Result<DownloadReport>
	where
		S: ?Sized + DownloadSink,
	{
		let kind = CallKind::Download;
		let descriptor = if descriptor.headers.contains_key("accept") {
			descriptor
		} else {
			descriptor.header("accept", "*/*")
		};
		let mut consumer = SinkConsumer { sink, progress };

		obs::observe_call(kind, descriptor.method, &descriptor.path, async {
			self.run(&descriptor, kind, self.config.transfer_timeout, &mut consumer).await
		})
		.await
	}
}

struct SinkConsumer<'s, S>
where
	S: ?Sized + DownloadSink,
{
	sink: &'s mut S,
	progress: Option<ProgressFn>,
}
impl<S> Consume for SinkConsumer<'_, S>
where
	S: ?Sized + DownloadSink,
{
	type Output = DownloadReport;

	fn consume(
		&mut self,
		response: TransportResponse,
		request_id: &RequestId,
	) -> impl Future<Output = Result<Self::Output, RawFailure>> + Send {
		async move {
			let TransportResponse { status, headers, mut body } = response;
			let expected = headers
				.get("content-length")
				.and_then(|raw| raw.trim().parse::<u64>().ok())
				.filter(|len| *len > 0);
			let mut written = 0_u64;
			let mut reported = 0_u8;

			self.sink.begin(expected).map_err(sink_failure)?;

			while let Some(chunk) = body.next().await {
				let chunk = chunk?;

				self.sink.write(&chunk).map_err(sink_failure)?;

				written += chunk.len() as u64;

				if let (Some(progress), Some(total)) = (&self.progress, expected) {
					let percent = percent(written, total);

					if percent > reported {
						reported = percent;

						progress(percent);
					}
				}
			}

			self.sink.finish().map_err(sink_failure)?;

			Ok(DownloadReport {
				status,
				bytes_written: written,
				request_id: request_id.clone(),
				content_type: headers.get("content-type").cloned(),
			})
		}
	}
}

fn percent(done: u64, total: u64) -> u8 {
	if total == 0 {
		return 100;
	}

	u8::try_from(done.saturating_mul(100) / total).unwrap_or(100).min(100)
}

fn sink_failure(e: io::Error) -> RawFailure {
	RawFailure::Build {
		message: "Download destination rejected the response body.".into(),
		source: Some(Arc::new(e)),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn recorder() -> (ProgressFn, Arc<Mutex<Vec<u8>>>) {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = seen.clone();

		(Arc::new(move |percent| sink.lock().push(percent)), seen)
	}

	#[test]
	fn chunks_report_strictly_increasing_progress() {
		let (progress, seen) = recorder();
		let upload = MultipartUpload::new(UploadFile::new("big.bin", vec![7_u8; 5 * 1024 * 1024]))
			.on_progress(progress);
		let total: usize = upload.chunks().map(|chunk| chunk.len()).sum();
		let seen = seen.lock().clone();

		assert_eq!(total, 5 * 1024 * 1024);
		assert!(seen.first().is_some_and(|first| *first > 0));
		assert_eq!(seen.last(), Some(&100));
		assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
	}

	#[test]
	fn each_pass_restarts_progress_and_empty_files_finish() {
		let (progress, seen) = recorder();
		let upload = MultipartUpload::new(UploadFile::new("a.txt", "abc")).on_progress(progress);

		assert_eq!(upload.chunks().count(), 1);
		assert_eq!(upload.chunks().count(), 1);
		assert_eq!(*seen.lock(), vec![100, 100]);

		let (progress, seen) = recorder();
		let empty = MultipartUpload::new(UploadFile::new("empty", Bytes::new())).on_progress(progress);

		assert_eq!(empty.chunks().count(), 0);
		assert_eq!(*seen.lock(), vec![100]);
	}

	#[test]
	fn file_sink_renames_on_finish() {
		let dir = std::env::temp_dir().join(format!("api_courier_sink_{}", std::process::id()));
		let dest = dir.join("report.csv");
		let mut sink = FileSink::new(&dest);

		sink.begin(Some(4)).expect("Sink should open.");
		sink.write(b"a,b\n").expect("Sink should accept bytes.");

		assert!(!dest.exists());

		sink.finish().expect("Sink should finish.");

		assert_eq!(fs::read(&dest).expect("Destination should exist."), b"a,b\n");
		assert!(!dir.join("report.csv.part").exists());

		let _ = fs::remove_dir_all(&dir);
	}

	#[test]
	fn buffer_sink_resets_on_begin() {
		let mut sink = BufferSink::default();

		sink.begin(None).expect("Begin should succeed.");
		sink.write(b"stale").expect("Write should succeed.");
		sink.begin(Some(3)).expect("Restart should succeed.");
		sink.write(b"new").expect("Write should succeed.");
		sink.finish().expect("Finish should succeed.");

		assert_eq!(sink.into_bytes().as_ref(), b"new");
	}

	#[test]
	fn percent_is_clamped() {
		assert_eq!(percent(0, 0), 100);
		assert_eq!(percent(50, 200), 25);
		assert_eq!(percent(300, 200), 100);
	}
}
