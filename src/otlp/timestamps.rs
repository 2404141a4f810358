//! Timestamp rewriting for replayed payloads
//!
//! Every `*_unix_nano` field carried by a payload is visited; zero means
//! "unset" in OTLP and is left untouched.

use crate::otlp::OtlpPayload;
use opentelemetry_proto::tonic::metrics::v1::metric::Data;
use opentelemetry_proto::tonic::metrics::v1::{Exemplar, NumberDataPoint};

/// Earliest non-zero timestamp in the payload
pub fn earliest_timestamp(payload: &OtlpPayload) -> Option<u64> {
    let mut earliest: Option<u64> = None;
    read_timestamps(payload, &mut |ts| {
        if ts != 0 {
            earliest = Some(earliest.map_or(ts, |e| e.min(ts)));
        }
    });
    earliest
}

/// Shift every non-zero timestamp by `offset_nanos`, saturating at the u64 bounds
pub fn shift_timestamps(payload: &mut OtlpPayload, offset_nanos: i128) {
    if offset_nanos == 0 {
        return;
    }
    for_each_timestamp(payload, &mut |ts| {
        if *ts != 0 {
            let shifted = (*ts as i128 + offset_nanos).clamp(1, u64::MAX as i128);
            *ts = shifted as u64;
        }
    });
}

fn for_each_timestamp(payload: &mut OtlpPayload, f: &mut dyn FnMut(&mut u64)) {
    match payload {
        OtlpPayload::Traces(req) => {
            for span in req
                .resource_spans
                .iter_mut()
                .flat_map(|rs| rs.scope_spans.iter_mut())
                .flat_map(|ss| ss.spans.iter_mut())
            {
                f(&mut span.start_time_unix_nano);
                f(&mut span.end_time_unix_nano);
                for event in span.events.iter_mut() {
                    f(&mut event.time_unix_nano);
                }
            }
        }
        OtlpPayload::Metrics(req) => {
            for metric in req
                .resource_metrics
                .iter_mut()
                .flat_map(|rm| rm.scope_metrics.iter_mut())
                .flat_map(|sm| sm.metrics.iter_mut())
            {
                match metric.data.as_mut() {
                    Some(Data::Gauge(gauge)) => {
                        gauge.data_points.iter_mut().for_each(|dp| number_point(dp, f))
                    }
                    Some(Data::Sum(sum)) => {
                        sum.data_points.iter_mut().for_each(|dp| number_point(dp, f))
                    }
                    Some(Data::Histogram(histogram)) => {
                        for dp in histogram.data_points.iter_mut() {
                            f(&mut dp.start_time_unix_nano);
                            f(&mut dp.time_unix_nano);
                            exemplars(&mut dp.exemplars, f);
                        }
                    }
                    Some(Data::ExponentialHistogram(histogram)) => {
                        for dp in histogram.data_points.iter_mut() {
                            f(&mut dp.start_time_unix_nano);
                            f(&mut dp.time_unix_nano);
                            exemplars(&mut dp.exemplars, f);
                        }
                    }
                    Some(Data::Summary(summary)) => {
                        for dp in summary.data_points.iter_mut() {
                            f(&mut dp.start_time_unix_nano);
                            f(&mut dp.time_unix_nano);
                        }
                    }
                    None => {}
                }
            }
        }
        OtlpPayload::Logs(req) => {
            for record in req
                .resource_logs
                .iter_mut()
                .flat_map(|rl| rl.scope_logs.iter_mut())
                .flat_map(|sl| sl.log_records.iter_mut())
            {
                f(&mut record.time_unix_nano);
                f(&mut record.observed_time_unix_nano);
            }
        }
    }
}

/// Read-only counterpart of [`for_each_timestamp`], visiting the same fields
fn read_timestamps(payload: &OtlpPayload, f: &mut dyn FnMut(u64)) {
    match payload {
        OtlpPayload::Traces(req) => {
            for span in req
                .resource_spans
                .iter()
                .flat_map(|rs| rs.scope_spans.iter())
                .flat_map(|ss| ss.spans.iter())
            {
                f(span.start_time_unix_nano);
                f(span.end_time_unix_nano);
                span.events.iter().for_each(|e| f(e.time_unix_nano));
            }
        }
        OtlpPayload::Metrics(req) => {
            let mut point = |start: u64, time: u64, exemplars: &[Exemplar]| {
                f(start);
                f(time);
                exemplars.iter().for_each(|e| f(e.time_unix_nano));
            };
            for metric in req
                .resource_metrics
                .iter()
                .flat_map(|rm| rm.scope_metrics.iter())
                .flat_map(|sm| sm.metrics.iter())
            {
                match metric.data.as_ref() {
                    Some(Data::Gauge(gauge)) => gauge
                        .data_points
                        .iter()
                        .for_each(|dp| point(dp.start_time_unix_nano, dp.time_unix_nano, &dp.exemplars)),
                    Some(Data::Sum(sum)) => sum
                        .data_points
                        .iter()
                        .for_each(|dp| point(dp.start_time_unix_nano, dp.time_unix_nano, &dp.exemplars)),
                    Some(Data::Histogram(histogram)) => histogram
                        .data_points
                        .iter()
                        .for_each(|dp| point(dp.start_time_unix_nano, dp.time_unix_nano, &dp.exemplars)),
                    Some(Data::ExponentialHistogram(histogram)) => histogram
                        .data_points
                        .iter()
                        .for_each(|dp| point(dp.start_time_unix_nano, dp.time_unix_nano, &dp.exemplars)),
                    Some(Data::Summary(summary)) => summary
                        .data_points
                        .iter()
                        .for_each(|dp| point(dp.start_time_unix_nano, dp.time_unix_nano, &[])),
                    None => {}
                }
            }
        }
        OtlpPayload::Logs(req) => {
            for record in req
                .resource_logs
                .iter()
                .flat_map(|rl| rl.scope_logs.iter())
                .flat_map(|sl| sl.log_records.iter())
            {
                f(record.time_unix_nano);
                f(record.observed_time_unix_nano);
            }
        }
    }
}

fn number_point(dp: &mut NumberDataPoint, f: &mut dyn FnMut(&mut u64)) {
    f(&mut dp.start_time_unix_nano);
    f(&mut dp.time_unix_nano);
    exemplars(&mut dp.exemplars, f);
}

fn exemplars(exemplars: &mut [Exemplar], f: &mut dyn FnMut(&mut u64)) {
    for exemplar in exemplars.iter_mut() {
        f(&mut exemplar.time_unix_nano);
    }
}
