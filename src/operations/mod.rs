/// Module for deleting remote files
pub(crate) mod delete;

/// Module for downloading files from remote server
pub(crate) mod download;

/// Module for listing remote directory contents
pub(crate) mod list;

/// Module for reading remote files into memory
pub(crate) mod read;

/// Module for uploading files to remote server
pub(crate) mod upload;
