pub mod upload_stager;
