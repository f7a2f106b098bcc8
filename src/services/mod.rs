pub mod image_cache;
pub mod jellyfin;
pub mod plex;
pub mod radarr;
pub mod sonarr;
pub mod tmdb;
pub mod trakt;
