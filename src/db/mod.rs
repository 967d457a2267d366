pub mod globe_at_night;
pub mod lib_download;
pub mod lib_postgrest;
