//! Background noise
//!
//! A silent socket between application bursts is atypical for a game
//! client, so an idle player wanders imperceptibly: one position packet a
//! second, with a sub-centimeter wobble derived from the clock.

use super::PacketSink;
use crate::protocol::{
    codec::{self, Encoder},
    SB_PLAYER_POSITION,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::MissedTickBehavior;

const TICK: Duration = Duration::from_secs(1);

const POS_X: f64 = 100.5;
const POS_Y: f64 = 64.0;
const POS_Z: f64 = 100.5;

/// Send one player-position packet per second until the session's writer
/// goes away.
pub(crate) async fn run(packets: PacketSink) {
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;

        let jitter = jitter();
        let mut body = Vec::with_capacity(25);
        let mut enc = Encoder::new(&mut body);
        enc.write_f64(POS_X + jitter);
        enc.write_f64(POS_Y);
        enc.write_f64(POS_Z + jitter);
        enc.write_bool(true); // on ground

        if packets
            .send(codec::encode_packet(SB_PLAYER_POSITION, &body))
            .is_err()
        {
            return;
        }
    }
}

fn jitter() -> f64 {
    let ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(ns % 100) / 5000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::Decoder;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_position_packet_shape() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(run(tx));

        let packet = rx.recv().await.unwrap();
        let mut cursor: &[u8] = &packet;
        let body = codec::read_packet(&mut cursor).await.unwrap();

        let mut dec = Decoder::new(&body);
        assert_eq!(dec.read_var_int().unwrap(), SB_PLAYER_POSITION);
        let x = dec.read_f64().unwrap();
        let y = dec.read_f64().unwrap();
        let z = dec.read_f64().unwrap();
        assert!(dec.read_bool().unwrap());
        assert_eq!(dec.remaining(), 0);

        assert!((POS_X..POS_X + 0.02).contains(&x));
        assert_eq!(y, POS_Y);
        assert!((POS_Z..POS_Z + 0.02).contains(&z));
    }

    #[tokio::test]
    async fn test_exits_when_sink_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(tx));
        drop(rx);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("noise task should stop")
            .unwrap();
    }
}
