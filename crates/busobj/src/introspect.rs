//! # Introspection
//!
//! Renders the introspection XML for an object from its descriptors, plus the
//! meta-interfaces every dispatched object answers.

use std::fmt::Write;

use crate::descriptor::Arg;
use crate::descriptor::InterfaceDescriptor;

pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
pub const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";
pub const PEER_INTERFACE: &str = "org.freedesktop.DBus.Peer";

const DOCTYPE: &str = r#"<!DOCTYPE node PUBLIC "-//freedesktop//DTD D-BUS Object Introspection 1.0//EN"
 "http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd">
"#;

const META_INTERFACES: &str = r#"  <interface name="org.freedesktop.DBus.Introspectable">
    <method name="Introspect">
      <arg name="xml_data" type="s" direction="out"/>
    </method>
  </interface>
  <interface name="org.freedesktop.DBus.Peer">
    <method name="Ping"/>
  </interface>
  <interface name="org.freedesktop.DBus.Properties">
    <method name="Get">
      <arg name="interface_name" type="s" direction="in"/>
      <arg name="property_name" type="s" direction="in"/>
      <arg name="value" type="v" direction="out"/>
    </method>
    <method name="GetAll">
      <arg name="interface_name" type="s" direction="in"/>
      <arg name="properties" type="a{sv}" direction="out"/>
    </method>
    <method name="Set">
      <arg name="interface_name" type="s" direction="in"/>
      <arg name="property_name" type="s" direction="in"/>
      <arg name="value" type="v" direction="in"/>
    </method>
    <signal name="PropertiesChanged">
      <arg name="interface_name" type="s"/>
      <arg name="changed_properties" type="a{sv}"/>
      <arg name="invalidated_properties" type="as"/>
    </signal>
  </interface>
"#;

/// Renders the XML document describing an object.
pub fn to_xml(interfaces: &[InterfaceDescriptor]) -> String {
    let mut xml = String::from(DOCTYPE);
    xml.push_str("<node>\n");
    xml.push_str(META_INTERFACES);
    for interface in interfaces {
        write_interface(&mut xml, interface);
    }
    xml.push_str("</node>\n");
    xml
}

fn write_interface(xml: &mut String, interface: &InterfaceDescriptor) {
    // Writing into a String cannot fail.
    let _ = writeln!(xml, r#"  <interface name="{}">"#, interface.name());

    for method in interface.methods() {
        if method.inputs.is_empty() && method.outputs.is_empty() {
            let _ = writeln!(xml, r#"    <method name="{}"/>"#, method.name);
            continue;
        }
        let _ = writeln!(xml, r#"    <method name="{}">"#, method.name);
        write_args(xml, &method.inputs, Some("in"));
        write_args(xml, &method.outputs, Some("out"));
        xml.push_str("    </method>\n");
    }

    for property in interface.properties() {
        let _ = writeln!(
            xml,
            r#"    <property name="{}" type="{}" access="{}"/>"#,
            property.name,
            property.signature,
            property.access.as_str()
        );
    }

    for signal in interface.signals() {
        if signal.args.is_empty() {
            let _ = writeln!(xml, r#"    <signal name="{}"/>"#, signal.name);
            continue;
        }
        let _ = writeln!(xml, r#"    <signal name="{}">"#, signal.name);
        write_args(xml, &signal.args, None);
        xml.push_str("    </signal>\n");
    }

    xml.push_str("  </interface>\n");
}

fn write_args(xml: &mut String, args: &[Arg], direction: Option<&str>) {
    for arg in args {
        match direction {
            Some(direction) => {
                let _ = writeln!(
                    xml,
                    r#"      <arg name="{}" type="{}" direction="{}"/>"#,
                    arg.name, arg.signature, direction
                );
            }
            None => {
                let _ = writeln!(xml, r#"      <arg name="{}" type="{}"/>"#, arg.name, arg.signature);
            }
        }
    }
}
