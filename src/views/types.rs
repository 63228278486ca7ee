//! Rows produced by the aggregate views.

use serde::Serialize;

use crate::model::Geometry;

/// Current bike availability of one station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BikeAvailability {
    pub station_id: String,
    pub station_capacity: u32,
    /// `num_bikes_available` of the newest reading that reported it.
    pub station_bikes_available: Option<i64>,
    /// Percentage of capacity, two decimals. `0` for stations without docks.
    pub station_availability: Option<f64>,
    pub geometry: Geometry,
}

/// Average hourly churn of one station, as a percentage of its capacity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyUtilization {
    pub station_id: String,
    pub name: String,
    pub geometry: Geometry,
    /// `None` when the window holds fewer than two readings to compare.
    pub utilization: Option<f64>,
}

/// Flat CSV form of [`BikeAvailability`].
#[derive(Debug, Serialize)]
pub struct AvailabilityRow<'a> {
    pub station_id: &'a str,
    pub station_capacity: u32,
    pub station_bikes_available: Option<i64>,
    pub station_availability: Option<f64>,
    pub longitude: f64,
    pub latitude: f64,
}

impl<'a> From<&'a BikeAvailability> for AvailabilityRow<'a> {
    fn from(view: &'a BikeAvailability) -> Self {
        Self {
            station_id: &view.station_id,
            station_capacity: view.station_capacity,
            station_bikes_available: view.station_bikes_available,
            station_availability: view.station_availability,
            longitude: view.geometry.longitude(),
            latitude: view.geometry.latitude(),
        }
    }
}

/// Flat CSV form of [`HourlyUtilization`].
#[derive(Debug, Serialize)]
pub struct UtilizationRow<'a> {
    pub station_id: &'a str,
    pub name: &'a str,
    pub utilization: Option<f64>,
    pub longitude: f64,
    pub latitude: f64,
}

impl<'a> From<&'a HourlyUtilization> for UtilizationRow<'a> {
    fn from(view: &'a HourlyUtilization) -> Self {
        Self {
            station_id: &view.station_id,
            name: &view.name,
            utilization: view.utilization,
            longitude: view.geometry.longitude(),
            latitude: view.geometry.latitude(),
        }
    }
}
